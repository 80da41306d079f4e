use std::fs;
use std::path::Path;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{CoreError, Result};
use crate::injury::{normalize_body_part, InjuryStatus};
use crate::schedule;
use crate::store::TrainingEpisode;

pub const ARTIFACT_VERSION: u32 = 1;
pub const FEATURE_COUNT: usize = 6;
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "body_part",
    "position",
    "status_severity",
    "episode_count",
    "recurrence_count",
    "season_progress",
];

const ENSEMBLE_SIZE: usize = 40;
const MAX_ITERS: usize = 600;
const LR_START: f64 = 0.1;
const L2_REG: f64 = 1e-3;
const SPLIT_SEED: u64 = 42;

/// Point estimate with the 10th/90th percentile band across the ensemble.
#[derive(Debug, Clone, Copy)]
pub struct RawEstimate {
    pub point: f64,
    pub low: f64,
    pub high: f64,
}

/// Train/test error report. Informational only; never affects behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrainMetrics {
    pub train_mae: f64,
    pub test_mae: f64,
    pub train_samples: usize,
    pub test_samples: usize,
}

/// Serialized form of a trained model: estimator coefficients plus the
/// categorical vocabularies captured at training time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: u32,
    pub generated_at: String,
    pub feature_names: Vec<String>,
    pub feature_means: Vec<f64>,
    pub feature_stds: Vec<f64>,
    /// Per-estimator coefficients: intercept followed by one weight per
    /// feature, applied to standardized inputs.
    pub estimators: Vec<Vec<f64>>,
    pub body_parts: Vec<String>,
    pub positions: Vec<String>,
    pub metrics: TrainMetrics,
}

/// A loaded recovery-time model: a bagged ensemble of linear estimators over
/// the six episode features.
#[derive(Debug, Clone)]
pub struct RecoveryModel {
    artifact: ModelArtifact,
}

impl RecoveryModel {
    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self> {
        if artifact.version != ARTIFACT_VERSION {
            return Err(CoreError::ArtifactInvalid("unsupported schema version"));
        }
        if artifact.body_parts.is_empty() || artifact.positions.is_empty() {
            return Err(CoreError::ArtifactInvalid("feature vocabulary is absent"));
        }
        if artifact.estimators.is_empty()
            || artifact.feature_means.len() != FEATURE_COUNT
            || artifact.feature_stds.len() != FEATURE_COUNT
        {
            return Err(CoreError::ArtifactInvalid("estimator table is malformed"));
        }
        Ok(Self { artifact })
    }

    /// Fit the ensemble on closed episodes. Rejects an empty training set
    /// with [`CoreError::InsufficientData`].
    pub fn train(rows: &[TrainingEpisode]) -> Result<Self> {
        if rows.is_empty() {
            return Err(CoreError::InsufficientData);
        }

        let body_parts = vocabulary(rows.iter().map(|r| normalize_body_part(&r.body_part)));
        let positions = vocabulary(rows.iter().map(|r| r.position.clone()));

        let samples: Vec<([f64; FEATURE_COUNT], f64)> = rows
            .iter()
            .map(|row| {
                let features = encode_features(
                    code_of(&body_parts, &normalize_body_part(&row.body_part))
                        .unwrap_or(body_parts.len() / 2),
                    code_of(&positions, &row.position).unwrap_or(0),
                    row.status,
                    row.player_episode_count,
                    row.body_part_recurrence,
                    row.week,
                );
                (features, row.days_missed as f64)
            })
            .collect();

        let mut indices: Vec<usize> = (0..samples.len()).collect();
        let mut rng = StdRng::seed_from_u64(SPLIT_SEED);
        indices.shuffle(&mut rng);
        let test_len = if samples.len() >= 5 { samples.len() / 5 } else { 0 };
        let (test_idx, train_idx) = indices.split_at(test_len);
        let train: Vec<_> = train_idx.iter().map(|&i| samples[i]).collect();
        let test: Vec<_> = test_idx.iter().map(|&i| samples[i]).collect();

        let (means, stds) = feature_norm_stats(&train);
        let estimators: Vec<Vec<f64>> = (0..ENSEMBLE_SIZE)
            .into_par_iter()
            .map(|k| fit_bootstrap_estimator(&train, &means, &stds, SPLIT_SEED + 7919 * k as u64))
            .collect();

        let mut artifact = ModelArtifact {
            version: ARTIFACT_VERSION,
            generated_at: Utc::now().to_rfc3339(),
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            feature_means: means.to_vec(),
            feature_stds: stds.to_vec(),
            estimators,
            body_parts,
            positions,
            metrics: TrainMetrics {
                train_mae: 0.0,
                test_mae: 0.0,
                train_samples: train.len(),
                test_samples: test.len(),
            },
        };

        let model = Self { artifact: artifact.clone() };
        artifact.metrics.train_mae = mae(&model, &train);
        artifact.metrics.test_mae = if test.is_empty() { artifact.metrics.train_mae } else { mae(&model, &test) };
        info!(
            train_samples = artifact.metrics.train_samples,
            test_samples = artifact.metrics.test_samples,
            train_mae = artifact.metrics.train_mae,
            test_mae = artifact.metrics.test_mae,
            "recovery model trained"
        );
        Ok(Self { artifact })
    }

    pub fn metrics(&self) -> TrainMetrics {
        self.artifact.metrics
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    /// Encode a single observation with the training-time vocabularies.
    /// Unseen body parts map to the vocabulary midpoint; unseen positions to
    /// code 0.
    pub fn encode(
        &self,
        body_part: &str,
        position: &str,
        status: InjuryStatus,
        episode_count: u32,
        recurrence_count: u32,
        week: u32,
    ) -> [f64; FEATURE_COUNT] {
        let bp = code_of(&self.artifact.body_parts, &normalize_body_part(body_part))
            .unwrap_or(self.artifact.body_parts.len() / 2);
        let pos = code_of(&self.artifact.positions, position).unwrap_or(0);
        encode_features(bp, pos, status, episode_count, recurrence_count, week)
    }

    /// Ensemble estimate: mean of the estimators, banded by their 10th and
    /// 90th percentiles. Never negative.
    pub fn estimate(&self, features: [f64; FEATURE_COUNT]) -> RawEstimate {
        let z = self.standardize(features);
        let mut preds: Vec<f64> = self
            .artifact
            .estimators
            .iter()
            .map(|coeffs| apply_estimator(coeffs, &z))
            .collect();
        let point = preds.iter().sum::<f64>() / preds.len() as f64;
        preds.sort_by(|a, b| a.total_cmp(b));
        RawEstimate {
            point: point.max(0.0),
            low: percentile(&preds, 10.0).max(0.0),
            high: percentile(&preds, 90.0).max(0.0),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(&self.artifact)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let artifact: ModelArtifact = serde_json::from_str(&raw)?;
        Self::from_artifact(artifact)
    }

    fn standardize(&self, features: [f64; FEATURE_COUNT]) -> [f64; FEATURE_COUNT] {
        let mut z = [0.0; FEATURE_COUNT];
        for (idx, value) in features.iter().enumerate() {
            let mean = self.artifact.feature_means[idx];
            let std = self.artifact.feature_stds[idx].max(1e-6);
            z[idx] = (value - mean) / std;
        }
        z
    }
}

fn encode_features(
    body_part_code: usize,
    position_code: usize,
    status: InjuryStatus,
    episode_count: u32,
    recurrence_count: u32,
    week: u32,
) -> [f64; FEATURE_COUNT] {
    [
        body_part_code as f64,
        position_code as f64,
        f64::from(status.severity_rank()),
        f64::from(episode_count),
        f64::from(recurrence_count),
        schedule::season_progress(week),
    ]
}

fn vocabulary<I: Iterator<Item = String>>(values: I) -> Vec<String> {
    let mut out: Vec<String> = values.collect();
    out.sort();
    out.dedup();
    out
}

fn code_of(vocab: &[String], value: &str) -> Option<usize> {
    vocab.iter().position(|v| v == value)
}

fn feature_norm_stats(
    samples: &[([f64; FEATURE_COUNT], f64)],
) -> ([f64; FEATURE_COUNT], [f64; FEATURE_COUNT]) {
    let n = samples.len().max(1) as f64;
    let mut means = [0.0; FEATURE_COUNT];
    for (x, _) in samples {
        for j in 0..FEATURE_COUNT {
            means[j] += x[j];
        }
    }
    for m in &mut means {
        *m /= n;
    }
    let mut stds = [0.0; FEATURE_COUNT];
    for (x, _) in samples {
        for j in 0..FEATURE_COUNT {
            let d = x[j] - means[j];
            stds[j] += d * d;
        }
    }
    for s in &mut stds {
        *s = (*s / n).sqrt().max(1e-6);
    }
    (means, stds)
}

/// One bagged estimator: gradient descent on squared error over a bootstrap
/// resample of the training set.
fn fit_bootstrap_estimator(
    train: &[([f64; FEATURE_COUNT], f64)],
    means: &[f64; FEATURE_COUNT],
    stds: &[f64; FEATURE_COUNT],
    seed: u64,
) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let sample: Vec<([f64; FEATURE_COUNT], f64)> = (0..train.len())
        .map(|_| train[rng.gen_range(0..train.len())])
        .collect();

    let mut coeffs = vec![0.0; FEATURE_COUNT + 1];
    for iter in 0..MAX_ITERS {
        let mut grad = vec![0.0; FEATURE_COUNT + 1];
        for (x, y) in &sample {
            let z = standardize_with(x, means, stds);
            let err = apply_estimator(&coeffs, &z) - y;
            grad[0] += err;
            for j in 0..FEATURE_COUNT {
                grad[j + 1] += err * z[j];
            }
        }
        let inv_n = 1.0 / sample.len().max(1) as f64;
        let lr = LR_START / (1.0 + iter as f64 * 0.01);
        coeffs[0] -= lr * grad[0] * inv_n;
        for j in 0..FEATURE_COUNT {
            coeffs[j + 1] -= lr * (grad[j + 1] * inv_n + L2_REG * coeffs[j + 1]);
        }
    }
    coeffs
}

fn standardize_with(
    x: &[f64; FEATURE_COUNT],
    means: &[f64; FEATURE_COUNT],
    stds: &[f64; FEATURE_COUNT],
) -> [f64; FEATURE_COUNT] {
    let mut z = [0.0; FEATURE_COUNT];
    for j in 0..FEATURE_COUNT {
        z[j] = (x[j] - means[j]) / stds[j].max(1e-6);
    }
    z
}

fn apply_estimator(coeffs: &[f64], z: &[f64; FEATURE_COUNT]) -> f64 {
    let mut sum = coeffs.first().copied().unwrap_or(0.0);
    for j in 0..FEATURE_COUNT {
        sum += coeffs.get(j + 1).copied().unwrap_or(0.0) * z[j];
    }
    sum
}

fn mae(model: &RecoveryModel, samples: &[([f64; FEATURE_COUNT], f64)]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let total: f64 = samples
        .iter()
        .map(|(x, y)| (model.estimate(*x).point - y).abs())
        .sum();
    total / samples.len() as f64
}

/// Linear-interpolated percentile over an ascending slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(body: &str, pos: &str, status: InjuryStatus, days: i64) -> TrainingEpisode {
        TrainingEpisode {
            body_part: body.to_string(),
            position: pos.to_string(),
            status,
            days_missed: days,
            week: 5,
            player_episode_count: 1,
            body_part_recurrence: 1,
        }
    }

    fn synthetic_rows() -> Vec<TrainingEpisode> {
        let mut rows = Vec::new();
        for i in 0..30 {
            // Severity drives the target: Out cases sit near 14 days,
            // Questionable near 4.
            let wiggle = (i % 3) as i64;
            rows.push(row("hamstring", "RB", InjuryStatus::Out, 13 + wiggle));
            rows.push(row("ankle", "WR", InjuryStatus::Questionable, 3 + wiggle));
        }
        rows
    }

    #[test]
    fn training_rejects_empty_input() {
        assert!(matches!(RecoveryModel::train(&[]), Err(CoreError::InsufficientData)));
    }

    #[test]
    fn ensemble_learns_severity_gradient() {
        let model = RecoveryModel::train(&synthetic_rows()).unwrap();
        let out = model.estimate(model.encode("hamstring", "RB", InjuryStatus::Out, 1, 1, 5));
        let quest =
            model.estimate(model.encode("ankle", "WR", InjuryStatus::Questionable, 1, 1, 5));
        assert!(out.point > quest.point);
        assert!(out.low <= out.point && out.point <= out.high);
        assert!((out.point - 14.0).abs() < 6.0, "point = {}", out.point);
    }

    #[test]
    fn unseen_categories_fall_back_to_fixed_codes() {
        let model = RecoveryModel::train(&synthetic_rows()).unwrap();
        let vocab_len = model.artifact().body_parts.len();
        let features = model.encode("elbow", "K", InjuryStatus::Out, 1, 1, 5);
        assert_eq!(features[0], (vocab_len / 2) as f64);
        assert_eq!(features[1], 0.0);
    }

    #[test]
    fn artifact_without_vocabulary_is_rejected() {
        let model = RecoveryModel::train(&synthetic_rows()).unwrap();
        let mut artifact = model.artifact().clone();
        artifact.body_parts.clear();
        assert!(matches!(
            RecoveryModel::from_artifact(artifact),
            Err(CoreError::ArtifactInvalid(_))
        ));
    }

    #[test]
    fn artifact_with_unknown_version_is_rejected() {
        let model = RecoveryModel::train(&synthetic_rows()).unwrap();
        let mut artifact = model.artifact().clone();
        artifact.version = ARTIFACT_VERSION + 1;
        assert!(matches!(
            RecoveryModel::from_artifact(artifact),
            Err(CoreError::ArtifactInvalid(_))
        ));
    }

    #[test]
    fn percentile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 50.0), 3.0);
        assert_eq!(percentile(&values, 100.0), 5.0);
    }
}
