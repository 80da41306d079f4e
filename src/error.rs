use thiserror::Error;

/// Failures the core can surface to callers.
///
/// Prediction-time conditions that a caller should branch on per item
/// (model not yet trained, un-encodable observation) are not errors; they
/// are variants of [`crate::predictor::PredictionOutcome`].
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage unreachable or corrupt. Fatal to the current operation; the
    /// core never retries on its own.
    #[error("persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("model artifact i/o error: {0}")]
    ArtifactIo(#[from] std::io::Error),

    #[error("model artifact decode error: {0}")]
    ArtifactDecode(#[from] serde_json::Error),

    /// Artifact parsed but is unusable (wrong schema version, missing
    /// feature vocabulary, no estimators).
    #[error("model artifact rejected: {0}")]
    ArtifactInvalid(&'static str),

    /// Training requested with zero eligible closed episodes.
    #[error("no eligible training rows (closed episodes with a body part)")]
    InsufficientData,

    /// A training run is already in flight.
    #[error("a training run is already in progress")]
    TrainingBusy,

    #[error("episode {0} does not exist")]
    EpisodeNotFound(i64),

    /// The episode already has an end date; resolving twice would silently
    /// rewrite days-missed, so it is rejected instead.
    #[error("episode {0} is already resolved")]
    AlreadyResolved(i64),
}

pub type Result<T> = std::result::Result<T, CoreError>;
