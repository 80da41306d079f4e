use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// NFL injury designation as reported by the status feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InjuryStatus {
    Questionable,
    Doubtful,
    Out,
    Pup,
    Ir,
    Suspended,
}

impl InjuryStatus {
    pub const ALL: [InjuryStatus; 6] = [
        InjuryStatus::Questionable,
        InjuryStatus::Doubtful,
        InjuryStatus::Out,
        InjuryStatus::Pup,
        InjuryStatus::Ir,
        InjuryStatus::Suspended,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            InjuryStatus::Questionable => "Questionable",
            InjuryStatus::Doubtful => "Doubtful",
            InjuryStatus::Out => "Out",
            InjuryStatus::Pup => "PUP",
            InjuryStatus::Ir => "IR",
            InjuryStatus::Suspended => "Suspended",
        }
    }

    pub fn parse(raw: &str) -> Option<InjuryStatus> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "questionable" => Some(InjuryStatus::Questionable),
            "doubtful" => Some(InjuryStatus::Doubtful),
            "out" => Some(InjuryStatus::Out),
            "pup" => Some(InjuryStatus::Pup),
            "ir" => Some(InjuryStatus::Ir),
            "suspended" => Some(InjuryStatus::Suspended),
            _ => None,
        }
    }

    /// Ordinal severity used as a model feature. Suspended is a non-medical
    /// category and ranks below Questionable.
    pub fn severity_rank(self) -> u8 {
        match self {
            InjuryStatus::Suspended => 0,
            InjuryStatus::Questionable => 1,
            InjuryStatus::Doubtful => 2,
            InjuryStatus::Out => 3,
            InjuryStatus::Pup => 4,
            InjuryStatus::Ir => 5,
        }
    }
}

impl ToSql for InjuryStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for InjuryStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        InjuryStatus::parse(raw).ok_or(FromSqlError::InvalidType)
    }
}

/// One injury signal as delivered by an external feed adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjuryObservation {
    pub player_name: String,
    pub position: String,
    pub team: String,
    pub status: InjuryStatus,
    pub body_part: Option<String>,
    pub notes: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub source: String,
}

/// One continuous tracked injury period for a player.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjuryEpisode {
    pub id: i64,
    pub player_name: String,
    pub position: String,
    pub team: String,
    pub status: InjuryStatus,
    pub body_part: Option<String>,
    pub notes: Option<String>,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub days_missed: Option<i64>,
    pub season: i32,
    pub week: u32,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InjuryEpisode {
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }
}

/// Append-only audit record for an episode's status transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChange {
    pub id: i64,
    pub episode_id: i64,
    pub old_status: InjuryStatus,
    pub new_status: InjuryStatus,
    pub changed_at: DateTime<Utc>,
}

/// Materialized per-player rollup. Rebuilt in full after every mutation of
/// that player's episodes; never a source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSummary {
    pub player_name: String,
    pub total_episodes: u32,
    pub total_days_missed: i64,
    pub recurring_body_parts: std::collections::HashMap<String, u32>,
    pub last_injury_start: Option<DateTime<Utc>>,
    /// Quick heuristic, superseded by the risk scorer's output.
    pub injury_prone_score: f64,
    pub updated_at: DateTime<Utc>,
}

/// One matched news item handed to the timeline analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub description: String,
    pub link: String,
    pub published: Option<DateTime<Utc>>,
}

/// Lowercase, whitespace-collapsed player key used for matching across feeds.
pub fn normalize_player_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Body parts are the recurrence key; feeds disagree on casing and padding.
pub fn normalize_body_part(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in InjuryStatus::ALL {
            assert_eq!(InjuryStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(InjuryStatus::parse(" ir "), Some(InjuryStatus::Ir));
        assert_eq!(InjuryStatus::parse("waived"), None);
    }

    #[test]
    fn severity_orders_medical_statuses() {
        assert!(InjuryStatus::Ir.severity_rank() > InjuryStatus::Out.severity_rank());
        assert!(InjuryStatus::Out.severity_rank() > InjuryStatus::Questionable.severity_rank());
        assert_eq!(InjuryStatus::Suspended.severity_rank(), 0);
    }

    #[test]
    fn normalization_compacts_names() {
        assert_eq!(normalize_player_name("  Justin   Jefferson "), "justin jefferson");
        assert_eq!(normalize_body_part(" Hamstring "), "hamstring");
    }
}
