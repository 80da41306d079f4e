use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const DATA_DIR: &str = "injury_watch";
const DB_FILE: &str = "injuries.db";
const MODEL_FILE: &str = "recovery_model.json";

/// Which estimate source backs the predictor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorKind {
    /// Learned ensemble loaded from the model artifact.
    Model,
    /// Historical-average / status-table rules, no training required.
    Rules,
}

impl EstimatorKind {
    /// Unknown values fall back to the model estimator.
    pub fn parse(raw: &str) -> EstimatorKind {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("rules") {
            EstimatorKind::Rules
        } else {
            if !trimmed.is_empty() && !trimmed.eq_ignore_ascii_case("model") {
                warn!(value = trimmed, "unknown estimator kind, defaulting to model");
            }
            EstimatorKind::Model
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub db_path: PathBuf,
    pub model_path: PathBuf,
    pub estimator: EstimatorKind,
}

impl CoreConfig {
    /// Resolve configuration from the environment, reading a `.env` file if
    /// one is present. Unset variables fall back to XDG data paths.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let db_path = env_path("INJURY_DB_PATH").unwrap_or_else(|| data_file(DB_FILE));
        let model_path = env_path("INJURY_MODEL_PATH").unwrap_or_else(|| data_file(MODEL_FILE));
        let estimator = std::env::var("RECOVERY_ESTIMATOR")
            .map(|raw| EstimatorKind::parse(&raw))
            .unwrap_or(EstimatorKind::Model);

        let config = Self { db_path, model_path, estimator };
        debug!(
            db = %config.db_path.display(),
            model = %config.model_path.display(),
            estimator = ?config.estimator,
            "resolved configuration"
        );
        config
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    let raw = std::env::var(key).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(PathBuf::from(trimmed))
}

fn data_file(file: &str) -> PathBuf {
    data_dir().join(file)
}

fn data_dir() -> PathBuf {
    // Prefer XDG data.
    if let Ok(base) = std::env::var("XDG_DATA_HOME") {
        if !base.trim().is_empty() {
            return PathBuf::from(base).join(DATA_DIR);
        }
    }
    // Fallback to ~/.local/share on linux-like systems.
    if let Ok(home) = std::env::var("HOME") {
        if !home.trim().is_empty() {
            return PathBuf::from(home).join(".local").join("share").join(DATA_DIR);
        }
    }
    // Last resort: keep files next to the process.
    PathBuf::from(DATA_DIR)
}
