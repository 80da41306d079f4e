//! One ingest cycle, end to end: persist a batch of observations, predict a
//! timeline for each resulting episode, fold in news overrides, and score
//! risk. A failure on one player's report never sinks the rest of the batch.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{CoreConfig, EstimatorKind};
use crate::error::{CoreError, Result};
use crate::injury::{normalize_player_name, InjuryEpisode, InjuryObservation, InjuryStatus, NewsItem};
use crate::news;
use crate::predictor::{
    ModelEstimator, Prediction, PredictionOutcome, RecoveryEstimator, RecoveryPredictor,
    RuleEstimator,
};
use crate::risk::{self, RiskAssessment};
use crate::store::{EpisodeStore, UpsertOutcome};

/// Everything derived for one player in a cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerReport {
    pub episode_id: i64,
    pub player_name: String,
    pub position: String,
    pub team: String,
    pub status: InjuryStatus,
    pub body_part: Option<String>,
    pub prediction: Option<Prediction>,
    /// Set when `prediction` is absent: why the predictor produced nothing.
    pub prediction_skipped: Option<String>,
    pub risk: RiskAssessment,
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub reports: Vec<PlayerReport>,
    /// Observations collapsed by batch dedup before persistence.
    pub deduped: usize,
    /// Episodes whose report failed and was skipped.
    pub failed: usize,
}

pub struct Pipeline {
    predictor: RecoveryPredictor,
}

impl Pipeline {
    pub fn new(predictor: RecoveryPredictor) -> Self {
        Self { predictor }
    }

    /// Build the predictor stack the configuration asks for.
    pub fn from_config(config: &CoreConfig) -> Result<Self> {
        let estimator: Box<dyn RecoveryEstimator> = match config.estimator {
            EstimatorKind::Model => Box::new(ModelEstimator::load_from(&config.model_path)?),
            EstimatorKind::Rules => Box::new(RuleEstimator),
        };
        Ok(Self::new(RecoveryPredictor::new(estimator)))
    }

    pub fn run_batch(
        &self,
        store: &mut EpisodeStore,
        observations: &[InjuryObservation],
        news_by_player: &HashMap<String, Vec<NewsItem>>,
    ) -> Result<CycleReport> {
        self.run_batch_at(store, observations, news_by_player, Utc::now())
    }

    /// Persistence failures on the batch write are fatal; everything after
    /// that is per-player and isolated.
    pub fn run_batch_at(
        &self,
        store: &mut EpisodeStore,
        observations: &[InjuryObservation],
        news_by_player: &HashMap<String, Vec<NewsItem>>,
        now: DateTime<Utc>,
    ) -> Result<CycleReport> {
        let batch = store.upsert_batch_at(observations, now)?;

        let mut reports = Vec::with_capacity(batch.upserts.len());
        let mut failed = 0usize;
        for upsert in &batch.upserts {
            match self.report_for(store, upsert, news_by_player, now) {
                Ok(report) => reports.push(report),
                Err(err) => {
                    failed += 1;
                    warn!(episode_id = upsert.episode_id, error = %err, "report skipped");
                }
            }
        }
        info!(
            observations = observations.len(),
            reports = reports.len(),
            deduped = batch.deduped,
            failed,
            "ingest cycle done"
        );
        Ok(CycleReport { reports, deduped: batch.deduped, failed })
    }

    /// Prediction, override, and risk for a single already-stored episode.
    pub fn report_for(
        &self,
        store: &EpisodeStore,
        upsert: &UpsertOutcome,
        news_by_player: &HashMap<String, Vec<NewsItem>>,
        now: DateTime<Utc>,
    ) -> Result<PlayerReport> {
        let episode = store
            .episode(upsert.episode_id)?
            .ok_or(CoreError::EpisodeNotFound(upsert.episode_id))?;
        let obs = observation_of(&episode);

        let mut prediction_skipped = None;
        let mut prediction = match self.predictor.predict_at(store, &obs, now)? {
            PredictionOutcome::Predicted(p) => Some(p),
            PredictionOutcome::ModelUnavailable => {
                prediction_skipped = Some("no trained model available".to_string());
                None
            }
            PredictionOutcome::EncodingFailed(reason) => {
                prediction_skipped = Some(reason);
                None
            }
        };

        if let Some(p) = prediction.as_mut() {
            let key = normalize_player_name(&obs.player_name);
            if let Some(items) = news_by_player.get(&key) {
                if let Some(ov) = news::analyze_at(items, now) {
                    info!(player = %obs.player_name, kind = ?ov.kind, "news override applied");
                    p.apply_override(ov, now);
                }
            }
        }

        let history = store.history(&obs.player_name)?;
        let risk = risk::assess(&history, Some(&obs));

        Ok(PlayerReport {
            episode_id: episode.id,
            player_name: episode.player_name,
            position: episode.position,
            team: episode.team,
            status: episode.status,
            body_part: episode.body_part,
            prediction,
            prediction_skipped,
            risk,
        })
    }
}

/// Treat a stored open episode as the current observation for downstream
/// scoring. The original feed record is not kept around.
fn observation_of(episode: &InjuryEpisode) -> InjuryObservation {
    InjuryObservation {
        player_name: episode.player_name.clone(),
        position: episode.position.clone(),
        team: episode.team.clone(),
        status: episode.status,
        body_part: episode.body_part.clone(),
        notes: episode.notes.clone(),
        start: Some(episode.start),
        source: episode.source.clone(),
    }
}
