//! NFL injury tracking core: episode storage, recovery-time prediction,
//! news-timeline overrides, and risk scoring.
//!
//! Feed polling, notification delivery, and any UI live in external
//! collaborators; this crate owns the derivation logic between an inbound
//! observation batch and the per-player reports.

pub mod config;
pub mod error;
pub mod injury;
pub mod model;
pub mod news;
pub mod pipeline;
pub mod predictor;
pub mod risk;
pub mod schedule;
pub mod store;

pub use config::{CoreConfig, EstimatorKind};
pub use error::{CoreError, Result};
pub use injury::{
    InjuryEpisode, InjuryObservation, InjuryStatus, NewsItem, PlayerSummary, StatusChange,
};
pub use news::{OverrideKind, OverrideSeverity, TimelineOverride};
pub use pipeline::{CycleReport, Pipeline, PlayerReport};
pub use predictor::{
    ModelEstimator, Prediction, PredictionOutcome, RecoveryEstimator, RecoveryPredictor,
    RuleEstimator,
};
pub use risk::{RiskAssessment, RiskBreakdown, RiskLevel};
pub use store::{BatchOutcome, EpisodeStore, UpsertAction, UpsertOutcome};
