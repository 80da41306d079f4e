use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CoreError, Result};
use crate::injury::{InjuryEpisode, InjuryObservation, InjuryStatus};
use crate::model::{RawEstimate, RecoveryModel, TrainMetrics};
use crate::news::TimelineOverride;
use crate::schedule;
use crate::store::EpisodeStore;

/// Per-item prediction result. Model absence and un-encodable observations
/// are ordinary outcomes callers branch on, not errors.
#[derive(Debug, Clone)]
pub enum PredictionOutcome {
    Predicted(Prediction),
    ModelUnavailable,
    EncodingFailed(String),
}

/// The estimator's numbers before a news override replaced them. Kept for
/// audit and display.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelEstimate {
    pub predicted_days: i64,
    pub weeks_out: u32,
    pub return_week: u32,
}

/// Outbound prediction record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub predicted_days: i64,
    pub confidence_low: i64,
    pub confidence_high: i64,
    pub expected_return: NaiveDate,
    pub weeks_out: u32,
    pub return_week: u32,
    pub current_week: u32,
    /// Band coverage, from the 10th/90th percentile interval.
    pub confidence_level: u8,
    pub status: InjuryStatus,
    pub overridden_by_news: bool,
    pub override_info: Option<TimelineOverride>,
    pub model_estimate: Option<ModelEstimate>,
}

impl Prediction {
    /// Replace the estimator's timeline with a news-derived one, retaining
    /// the original numbers alongside.
    pub fn apply_override(&mut self, ov: TimelineOverride, now: DateTime<Utc>) {
        self.model_estimate = Some(ModelEstimate {
            predicted_days: self.predicted_days,
            weeks_out: self.weeks_out,
            return_week: self.return_week,
        });
        self.predicted_days = ov.predicted_days;
        self.confidence_low = ov.confidence_low;
        self.confidence_high = ov.confidence_high;
        self.weeks_out = ceil_weeks(ov.predicted_days);
        self.return_week = self.current_week + self.weeks_out;
        self.expected_return = (now + Duration::days(ov.predicted_days)).date_naive();
        self.overridden_by_news = true;
        self.override_info = Some(ov);
    }
}

/// Weeks, rounded up: a 19-day absence costs three weeks, not two.
pub fn ceil_weeks(days: i64) -> u32 {
    ((days.max(0) + 6) / 7) as u32
}

#[derive(Debug, Clone)]
pub enum EstimateOutcome {
    Estimate(RawEstimate),
    ModelUnavailable,
    EncodingFailed(String),
}

/// Capability seam between the predictor and its estimate source. Two
/// variants ship: the learned ensemble and the rule-only fallback.
pub trait RecoveryEstimator: Send + Sync {
    fn raw_estimate(
        &self,
        store: &EpisodeStore,
        obs: &InjuryObservation,
        week: u32,
    ) -> Result<EstimateOutcome>;
}

/// Learned-model variant. The model reference is swapped atomically on
/// retrain, so reads may continue against the previous model while a new one
/// is fit; only one training run may be in flight.
pub struct ModelEstimator {
    model: RwLock<Option<Arc<RecoveryModel>>>,
    train_guard: Mutex<()>,
}

impl ModelEstimator {
    pub fn empty() -> Self {
        Self { model: RwLock::new(None), train_guard: Mutex::new(()) }
    }

    pub fn with_model(model: RecoveryModel) -> Self {
        Self { model: RwLock::new(Some(Arc::new(model))), train_guard: Mutex::new(()) }
    }

    /// Load a persisted artifact if one exists; a missing file just means no
    /// model yet, while a present-but-invalid artifact is surfaced.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "no model artifact yet");
            return Ok(Self::empty());
        }
        let model = RecoveryModel::load(path)?;
        Ok(Self::with_model(model))
    }

    pub fn current(&self) -> Option<Arc<RecoveryModel>> {
        self.model.read().ok().and_then(|guard| guard.clone())
    }

    pub fn install(&self, model: RecoveryModel) {
        if let Ok(mut guard) = self.model.write() {
            *guard = Some(Arc::new(model));
        }
    }

    /// Operator-triggered batch training over every eligible closed episode.
    /// Rejected while another run holds the guard.
    pub fn train_from_store(&self, store: &EpisodeStore) -> Result<TrainMetrics> {
        let _guard = self.train_guard.try_lock().map_err(|_| CoreError::TrainingBusy)?;
        let rows = store.training_episodes()?;
        let model = RecoveryModel::train(&rows)?;
        let metrics = model.metrics();
        self.install(model);
        Ok(metrics)
    }

    /// Persist the in-memory model; no-op when none is loaded.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(model) = self.current() {
            model.save(path)?;
        }
        Ok(())
    }
}

impl RecoveryEstimator for ModelEstimator {
    fn raw_estimate(
        &self,
        store: &EpisodeStore,
        obs: &InjuryObservation,
        week: u32,
    ) -> Result<EstimateOutcome> {
        let Some(model) = self.current() else {
            return Ok(EstimateOutcome::ModelUnavailable);
        };
        let Some(body_part) = obs.body_part.as_deref().filter(|s| !s.trim().is_empty()) else {
            return Ok(EstimateOutcome::EncodingFailed("missing body part".to_string()));
        };

        let episode_count = store.history(&obs.player_name)?.len() as u32;
        let recurrence = store
            .recurrence(&obs.player_name)?
            .get(&crate::injury::normalize_body_part(body_part))
            .copied()
            .unwrap_or(1);

        let features =
            model.encode(body_part, &obs.position, obs.status, episode_count, recurrence, week);
        Ok(EstimateOutcome::Estimate(model.estimate(features)))
    }
}

/// Rule-only variant: mean historical recovery for the body part when the
/// store has any, otherwise a fixed per-status table. No training step.
pub struct RuleEstimator;

impl RuleEstimator {
    fn status_default(status: InjuryStatus) -> RawEstimate {
        let (point, low, high) = match status {
            InjuryStatus::Questionable => (4.0, 1.0, 7.0),
            InjuryStatus::Doubtful => (6.0, 2.0, 10.0),
            InjuryStatus::Out => (10.0, 5.0, 17.0),
            InjuryStatus::Pup => (35.0, 28.0, 49.0),
            InjuryStatus::Ir => (49.0, 30.0, 70.0),
            InjuryStatus::Suspended => (7.0, 3.0, 21.0),
        };
        RawEstimate { point, low, high }
    }
}

impl RecoveryEstimator for RuleEstimator {
    fn raw_estimate(
        &self,
        store: &EpisodeStore,
        obs: &InjuryObservation,
        _week: u32,
    ) -> Result<EstimateOutcome> {
        if let Some(body_part) = obs.body_part.as_deref().filter(|s| !s.trim().is_empty()) {
            let avg = match store.average_recovery(body_part, Some(obs.status))? {
                Some(avg) => Some(avg),
                None => store.average_recovery(body_part, None)?,
            };
            if let Some(avg) = avg {
                let point = avg.max(0.0);
                return Ok(EstimateOutcome::Estimate(RawEstimate {
                    point,
                    low: point * 0.75,
                    high: point * 1.5,
                }));
            }
        }
        Ok(EstimateOutcome::Estimate(Self::status_default(obs.status)))
    }
}

/// Applies NFL floors and calendar conversion over a pluggable estimator.
pub struct RecoveryPredictor {
    estimator: Box<dyn RecoveryEstimator>,
}

impl RecoveryPredictor {
    pub fn new(estimator: Box<dyn RecoveryEstimator>) -> Self {
        Self { estimator }
    }

    pub fn predict(&self, store: &EpisodeStore, obs: &InjuryObservation) -> Result<PredictionOutcome> {
        self.predict_at(store, obs, Utc::now())
    }

    pub fn predict_at(
        &self,
        store: &EpisodeStore,
        obs: &InjuryObservation,
        now: DateTime<Utc>,
    ) -> Result<PredictionOutcome> {
        let current_week = schedule::current_week(now);
        let raw = match self.estimator.raw_estimate(store, obs, current_week)? {
            EstimateOutcome::Estimate(raw) => raw,
            EstimateOutcome::ModelUnavailable => {
                warn!(player = %obs.player_name, "prediction skipped: no trained model");
                return Ok(PredictionOutcome::ModelUnavailable);
            }
            EstimateOutcome::EncodingFailed(reason) => {
                warn!(player = %obs.player_name, %reason, "prediction skipped: encoding failed");
                return Ok(PredictionOutcome::EncodingFailed(reason));
            }
        };

        let (mut point, mut low, mut high) = (raw.point, raw.low, raw.high);

        // NFL roster rules, non-negotiable regardless of the raw estimate.
        match obs.status {
            InjuryStatus::Ir | InjuryStatus::Pup => {
                point = point.max(28.0);
                low = low.max(28.0);
                high = high.max(point + 14.0);
            }
            InjuryStatus::Out => {
                point = point.max(7.0);
                low = low.max(3.0);
            }
            _ => {}
        }
        high = high.max(point).max(low);

        let predicted_days = point.max(0.0) as i64;
        let weeks_out = ceil_weeks(predicted_days);
        Ok(PredictionOutcome::Predicted(Prediction {
            predicted_days,
            confidence_low: low.max(0.0) as i64,
            confidence_high: high.max(0.0) as i64,
            expected_return: (now + Duration::days(predicted_days)).date_naive(),
            weeks_out,
            return_week: current_week + weeks_out,
            current_week,
            confidence_level: 80,
            status: obs.status,
            overridden_by_news: false,
            override_info: None,
            model_estimate: None,
        }))
    }

    /// Closed episodes matching the observation's body part and position,
    /// for side-by-side display.
    pub fn similar_episodes(
        &self,
        store: &EpisodeStore,
        obs: &InjuryObservation,
        limit: u32,
    ) -> Result<Vec<InjuryEpisode>> {
        let Some(body_part) = obs.body_part.as_deref() else {
            return Ok(Vec::new());
        };
        store.similar_episodes(body_part, &obs.position, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelArtifact, TrainMetrics, ARTIFACT_VERSION, FEATURE_COUNT};
    use chrono::TimeZone;

    fn flat_model(intercept: f64) -> RecoveryModel {
        RecoveryModel::from_artifact(ModelArtifact {
            version: ARTIFACT_VERSION,
            generated_at: "test".to_string(),
            feature_names: Vec::new(),
            feature_means: vec![0.0; FEATURE_COUNT],
            feature_stds: vec![1.0; FEATURE_COUNT],
            estimators: vec![{
                let mut c = vec![0.0; FEATURE_COUNT + 1];
                c[0] = intercept;
                c
            }],
            body_parts: vec!["knee".to_string()],
            positions: vec!["RB".to_string()],
            metrics: TrainMetrics {
                train_mae: 0.0,
                test_mae: 0.0,
                train_samples: 1,
                test_samples: 0,
            },
        })
        .unwrap()
    }

    fn observation(status: InjuryStatus, body_part: Option<&str>) -> InjuryObservation {
        InjuryObservation {
            player_name: "Test Player".to_string(),
            position: "RB".to_string(),
            team: "SF".to_string(),
            status,
            body_part: body_part.map(|s| s.to_string()),
            notes: None,
            start: None,
            source: "test".to_string(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn ir_floor_overrides_a_zero_model() {
        let store = EpisodeStore::open_in_memory().unwrap();
        let predictor =
            RecoveryPredictor::new(Box::new(ModelEstimator::with_model(flat_model(0.0))));
        let outcome = predictor
            .predict_at(&store, &observation(InjuryStatus::Ir, Some("knee")), now())
            .unwrap();
        let PredictionOutcome::Predicted(p) = outcome else { panic!("expected prediction") };
        assert!(p.predicted_days >= 28);
        assert!(p.confidence_low >= 28);
        assert!(p.confidence_high >= p.predicted_days + 14);
    }

    #[test]
    fn out_floor_and_week_ceiling() {
        let store = EpisodeStore::open_in_memory().unwrap();
        let predictor =
            RecoveryPredictor::new(Box::new(ModelEstimator::with_model(flat_model(19.0))));
        let outcome = predictor
            .predict_at(&store, &observation(InjuryStatus::Out, Some("knee")), now())
            .unwrap();
        let PredictionOutcome::Predicted(p) = outcome else { panic!("expected prediction") };
        assert_eq!(p.predicted_days, 19);
        assert_eq!(p.weeks_out, 3);
        assert_eq!(p.return_week, p.current_week + 3);
        assert!(p.confidence_low >= 3);
    }

    #[test]
    fn missing_model_and_missing_body_part_are_structured() {
        let store = EpisodeStore::open_in_memory().unwrap();
        let predictor = RecoveryPredictor::new(Box::new(ModelEstimator::empty()));
        let obs = observation(InjuryStatus::Out, Some("knee"));
        assert!(matches!(
            predictor.predict_at(&store, &obs, now()).unwrap(),
            PredictionOutcome::ModelUnavailable
        ));

        let predictor =
            RecoveryPredictor::new(Box::new(ModelEstimator::with_model(flat_model(5.0))));
        let obs = observation(InjuryStatus::Out, None);
        assert!(matches!(
            predictor.predict_at(&store, &obs, now()).unwrap(),
            PredictionOutcome::EncodingFailed(_)
        ));
    }

    #[test]
    fn rule_estimator_prefers_historical_average() {
        let mut store = EpisodeStore::open_in_memory().unwrap();
        let start = Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap();
        let mut obs = observation(InjuryStatus::Out, Some("hamstring"));
        obs.start = Some(start);
        let id = store.upsert_at(&obs, start).unwrap().episode_id;
        store.resolve(id, start + Duration::days(20)).unwrap();

        let predictor = RecoveryPredictor::new(Box::new(RuleEstimator));
        let outcome = predictor
            .predict_at(&store, &observation(InjuryStatus::Out, Some("hamstring")), now())
            .unwrap();
        let PredictionOutcome::Predicted(p) = outcome else { panic!("expected prediction") };
        assert_eq!(p.predicted_days, 20);

        // No history for this part: fixed status table.
        let outcome = predictor
            .predict_at(&store, &observation(InjuryStatus::Questionable, Some("wrist")), now())
            .unwrap();
        let PredictionOutcome::Predicted(p) = outcome else { panic!("expected prediction") };
        assert_eq!(p.predicted_days, 4);
    }

    #[test]
    fn concurrent_training_is_rejected() {
        let store = EpisodeStore::open_in_memory().unwrap();
        let estimator = ModelEstimator::empty();
        let _in_flight = estimator.train_guard.lock().unwrap();
        assert!(matches!(
            estimator.train_from_store(&store),
            Err(CoreError::TrainingBusy)
        ));
    }

    #[test]
    fn weeks_round_up() {
        assert_eq!(ceil_weeks(0), 0);
        assert_eq!(ceil_weeks(7), 1);
        assert_eq!(ceil_weeks(8), 2);
        assert_eq!(ceil_weeks(19), 3);
    }
}
