//! Injury risk scoring.
//!
//! A pure function of one player's episode history plus, optionally, the
//! current open observation. Five weighted sub-scores, each on a 0-100
//! scale, combine into a composite that maps to a risk level.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::injury::{normalize_body_part, InjuryEpisode, InjuryObservation, InjuryStatus};

const WEIGHT_FREQUENCY: f64 = 0.30;
const WEIGHT_RECURRENCE: f64 = 0.25;
const WEIGHT_SEVERITY: f64 = 0.20;
const WEIGHT_RECENCY: f64 = 0.15;
const WEIGHT_RECOVERY: f64 = 0.10;

/// Body parts with outsized re-injury or career impact.
const HIGH_RISK_PARTS: &[&str] =
    &["achilles", "acl", "mcl", "pcl", "meniscus", "concussion", "back", "neck"];
const MODERATE_RISK_PARTS: &[&str] =
    &["hamstring", "groin", "quad", "calf", "shoulder", "ankle"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Minimal,
    Low,
    Moderate,
    High,
    Critical,
}

impl RiskLevel {
    pub fn for_score(score: f64) -> RiskLevel {
        if score >= 75.0 {
            RiskLevel::Critical
        } else if score >= 60.0 {
            RiskLevel::High
        } else if score >= 40.0 {
            RiskLevel::Moderate
        } else if score >= 20.0 {
            RiskLevel::Low
        } else {
            RiskLevel::Minimal
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Minimal => "Minimal",
            RiskLevel::Low => "Low",
            RiskLevel::Moderate => "Moderate",
            RiskLevel::High => "High",
            RiskLevel::Critical => "Critical",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RiskBreakdown {
    pub frequency: f64,
    pub recurrence: f64,
    pub severity: f64,
    pub recency: f64,
    pub recovery: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Composite score, 0-100, rounded to one decimal.
    pub score: f64,
    pub level: RiskLevel,
    pub breakdown: RiskBreakdown,
    pub message: String,
    /// Body parts injured more than once, worst first.
    pub chronic_areas: Vec<String>,
    pub total_episodes: u32,
}

/// Score a player from their episode history and the current observation.
/// History is expected to already include the episode for the current
/// observation when one is open.
pub fn assess(history: &[InjuryEpisode], current: Option<&InjuryObservation>) -> RiskAssessment {
    if history.is_empty() && current.is_none() {
        return RiskAssessment {
            score: 0.0,
            level: RiskLevel::Minimal,
            breakdown: RiskBreakdown::default(),
            message: "No injury history".to_string(),
            chronic_areas: Vec::new(),
            total_episodes: 0,
        };
    }

    let part_counts = body_part_counts(history);
    let current_part = current
        .and_then(|obs| obs.body_part.as_deref())
        .map(normalize_body_part);

    let breakdown = RiskBreakdown {
        frequency: frequency_score(history.len() as u32),
        recurrence: recurrence_score(&part_counts, current_part.as_deref()),
        severity: severity_score(current),
        recency: if current.is_some() { 90.0 } else { 0.0 },
        recovery: recovery_score(current),
    };

    let raw = breakdown.frequency * WEIGHT_FREQUENCY
        + breakdown.recurrence * WEIGHT_RECURRENCE
        + breakdown.severity * WEIGHT_SEVERITY
        + breakdown.recency * WEIGHT_RECENCY
        + breakdown.recovery * WEIGHT_RECOVERY;
    let score = round1(raw.clamp(0.0, 100.0));

    let chronic_areas = chronic_areas(&part_counts);
    let message = message_for(score, history, current, &part_counts, current_part.as_deref());

    RiskAssessment {
        score,
        level: RiskLevel::for_score(score),
        breakdown,
        message,
        chronic_areas,
        total_episodes: history.len() as u32,
    }
}

/// Step function of total episode count.
fn frequency_score(episodes: u32) -> f64 {
    let score = match episodes {
        0 => 0.0,
        1 => 15.0,
        2 => 35.0,
        3 => 60.0,
        4 => 85.0,
        n => 85.0 + 5.0 * f64::from(n - 4),
    };
    score.min(100.0)
}

fn recurrence_score(part_counts: &HashMap<String, u32>, current_part: Option<&str>) -> f64 {
    let max_count = part_counts.values().copied().max().unwrap_or(0);
    if max_count < 2 {
        return 0.0;
    }

    let base = match max_count {
        2 => 30.0,
        3 => 60.0,
        _ => 90.0,
    };
    let distinct_recurring = part_counts.values().filter(|&&c| c > 1).count() as f64;
    let mut score = base + distinct_recurring * 10.0;

    // The current injury re-aggravating a known trouble spot is the
    // strongest recurrence signal of all.
    if let Some(part) = current_part {
        if part_counts.get(part).copied().unwrap_or(0) > 1 {
            score += 20.0;
        }
    }

    score.min(100.0)
}

fn severity_score(current: Option<&InjuryObservation>) -> f64 {
    let Some(obs) = current else { return 0.0 };
    match obs.status {
        InjuryStatus::Suspended => 0.0,
        InjuryStatus::Questionable => 20.0,
        InjuryStatus::Doubtful => 40.0,
        InjuryStatus::Out => 60.0,
        InjuryStatus::Pup => 80.0,
        InjuryStatus::Ir => 100.0,
    }
}

/// Expected-recovery burden of the current injury: a status base plus a
/// body-part adjustment for areas that heal slowly or re-tear.
fn recovery_score(current: Option<&InjuryObservation>) -> f64 {
    let Some(obs) = current else { return 0.0 };
    let base: f64 = match obs.status {
        InjuryStatus::Suspended => 0.0,
        InjuryStatus::Questionable => 40.0,
        InjuryStatus::Doubtful => 60.0,
        InjuryStatus::Out => 90.0,
        InjuryStatus::Pup | InjuryStatus::Ir => 100.0,
    };
    let adjustment = match obs.body_part.as_deref().map(normalize_body_part) {
        Some(part) if HIGH_RISK_PARTS.iter().any(|p| part.contains(p)) => 20.0,
        Some(part) if MODERATE_RISK_PARTS.iter().any(|p| part.contains(p)) => 10.0,
        _ => 0.0,
    };
    (base + adjustment).min(100.0)
}

fn body_part_counts(history: &[InjuryEpisode]) -> HashMap<String, u32> {
    let mut counts: HashMap<String, u32> = HashMap::new();
    for episode in history {
        if let Some(part) = episode.body_part.as_deref() {
            *counts.entry(normalize_body_part(part)).or_insert(0) += 1;
        }
    }
    counts
}

fn chronic_areas(part_counts: &HashMap<String, u32>) -> Vec<String> {
    let mut areas: Vec<(String, u32)> = part_counts
        .iter()
        .filter(|(_, &count)| count > 1)
        .map(|(part, &count)| (part.clone(), count))
        .collect();
    areas.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    areas.into_iter().map(|(part, _)| part).collect()
}

/// Ordered concatenation of the observations that apply; fixed strings at
/// the extremes.
fn message_for(
    score: f64,
    history: &[InjuryEpisode],
    current: Option<&InjuryObservation>,
    part_counts: &HashMap<String, u32>,
    current_part: Option<&str>,
) -> String {
    if score < 20.0 {
        return "Clean injury history - low risk of future problems".to_string();
    }

    let mut notes = Vec::new();

    if history.len() > 2 {
        notes.push(format!("Injury-prone: {} recorded injuries", history.len()));
    }

    if let Some(part) = current_part {
        let count = part_counts.get(part).copied().unwrap_or(0);
        if count > 1 {
            notes.push(format!("Recurring {} injury ({}x)", part, count));
        }
    }

    if let Some(obs) = current {
        if matches!(obs.status, InjuryStatus::Ir | InjuryStatus::Pup) {
            notes.push(format!("Currently {} - extended absence expected", obs.status.as_str()));
        }
    }

    if notes.is_empty() {
        return "Elevated risk of future injury problems".to_string();
    }
    notes.join("; ")
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}
