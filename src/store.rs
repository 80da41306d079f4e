use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::error::{CoreError, Result};
use crate::injury::{
    normalize_body_part, normalize_player_name, InjuryEpisode, InjuryObservation, InjuryStatus,
    PlayerSummary, StatusChange,
};
use crate::schedule;

/// Owner of the single injury-history SQLite file: episodes, their
/// status-change audit log, and the per-player materialized summary.
pub struct EpisodeStore {
    conn: Connection,
}

/// What `upsert` did with one observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertAction {
    Inserted,
    StatusChanged { from: InjuryStatus },
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub episode_id: i64,
    pub action: UpsertAction,
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub upserts: Vec<UpsertOutcome>,
    /// Observations dropped by batch-level dedup before touching storage.
    pub deduped: usize,
}

#[derive(Debug, Clone)]
pub struct BodyPartCount {
    pub body_part: String,
    pub count: u32,
}

#[derive(Debug, Clone)]
pub struct InjuryTrends {
    pub window_days: u32,
    pub total_episodes: u32,
    pub body_parts: Vec<BodyPartCount>,
}

/// One closed episode joined with the per-player counts the model trains on.
#[derive(Debug, Clone)]
pub struct TrainingEpisode {
    pub body_part: String,
    pub position: String,
    pub status: InjuryStatus,
    pub days_missed: i64,
    pub week: u32,
    pub player_episode_count: u32,
    pub body_part_recurrence: u32,
}

impl EpisodeStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Resolve one observation against the player's open episodes.
    ///
    /// Matching key is player + normalized body part. An open match with the
    /// same status is a no-op; a different status appends a [`StatusChange`]
    /// and updates the episode in place; no match creates a new open episode.
    /// The player's summary is rebuilt afterwards in every mutating case.
    pub fn upsert(&mut self, obs: &InjuryObservation) -> Result<UpsertOutcome> {
        self.upsert_at(obs, Utc::now())
    }

    pub fn upsert_at(&mut self, obs: &InjuryObservation, now: DateTime<Utc>) -> Result<UpsertOutcome> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        match self.apply_upsert(obs, now) {
            Ok(outcome) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(outcome)
            }
            Err(err) => {
                self.conn.execute_batch("ROLLBACK").ok();
                Err(err)
            }
        }
    }

    /// Upsert body. Callers own the enclosing transaction: a failure halfway
    /// must never leave an audit row without its episode update.
    fn apply_upsert(&mut self, obs: &InjuryObservation, now: DateTime<Utc>) -> Result<UpsertOutcome> {
        let player_key = normalize_player_name(&obs.player_name);
        let body_norm = normalized_body_part_opt(obs.body_part.as_deref());
        let open = self.open_episodes_for(&player_key, body_norm.as_deref())?;

        // Legacy duplicates (same player + body part both open) are merged
        // into the newest episode; their audit rows go with them.
        if open.len() > 1 {
            warn!(
                player = %obs.player_name,
                body_part = body_norm.as_deref().unwrap_or("-"),
                duplicates = open.len() - 1,
                "merging duplicate open episodes"
            );
            for stale in &open[1..] {
                self.conn
                    .execute("DELETE FROM status_changes WHERE episode_id = ?1", params![stale])?;
                self.conn.execute("DELETE FROM episodes WHERE id = ?1", params![stale])?;
            }
        }

        let outcome = if let Some(&episode_id) = open.first() {
            let current: InjuryStatus = self.conn.query_row(
                "SELECT status FROM episodes WHERE id = ?1",
                params![episode_id],
                |row| row.get(0),
            )?;
            if current == obs.status {
                UpsertOutcome { episode_id, action: UpsertAction::Unchanged }
            } else {
                self.conn.execute(
                    "INSERT INTO status_changes (episode_id, old_status, new_status, changed_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![episode_id, current, obs.status, ts(now)],
                )?;
                self.conn.execute(
                    "UPDATE episodes SET status = ?1, updated_at = ?2 WHERE id = ?3",
                    params![obs.status, ts(now), episode_id],
                )?;
                debug!(
                    player = %obs.player_name,
                    from = current.as_str(),
                    to = obs.status.as_str(),
                    "episode status changed"
                );
                UpsertOutcome { episode_id, action: UpsertAction::StatusChanged { from: current } }
            }
        } else {
            let start = obs.start.unwrap_or(now);
            self.conn.execute(
                "INSERT INTO episodes (
                    player_key, player_name, position, team, status, body_part, notes,
                    start_at, end_at, days_missed, season, week, source, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, NULL, ?9, ?10, ?11, ?12, ?13)",
                params![
                    player_key,
                    obs.player_name,
                    obs.position,
                    obs.team,
                    obs.status,
                    body_norm,
                    obs.notes,
                    ts(start),
                    schedule::season_year(start),
                    schedule::current_week(start),
                    obs.source,
                    ts(now),
                    ts(now),
                ],
            )?;
            let episode_id = self.conn.last_insert_rowid();
            debug!(player = %obs.player_name, episode_id, "episode opened");
            UpsertOutcome { episode_id, action: UpsertAction::Inserted }
        };

        if outcome.action != UpsertAction::Unchanged {
            self.recompute_summary_keyed(&player_key, &obs.player_name, now)?;
        }
        Ok(outcome)
    }

    /// One poll cycle's worth of observations. Conflicting statuses for the
    /// same player + team + body part collapse to the most severe one, and
    /// identical observations collapse to a single upsert, so a batch can
    /// never inflate into multiple episodes for one combination.
    pub fn upsert_batch(&mut self, observations: &[InjuryObservation]) -> Result<BatchOutcome> {
        self.upsert_batch_at(observations, Utc::now())
    }

    pub fn upsert_batch_at(
        &mut self,
        observations: &[InjuryObservation],
        now: DateTime<Utc>,
    ) -> Result<BatchOutcome> {
        let mut order: Vec<(String, String, String)> = Vec::new();
        let mut chosen: HashMap<(String, String, String), &InjuryObservation> = HashMap::new();
        for obs in observations {
            let key = (
                normalize_player_name(&obs.player_name),
                obs.team.to_uppercase(),
                normalized_body_part_opt(obs.body_part.as_deref()).unwrap_or_default(),
            );
            match chosen.get(&key) {
                None => {
                    order.push(key.clone());
                    chosen.insert(key, obs);
                }
                Some(existing) => {
                    if obs.status.severity_rank() > existing.status.severity_rank() {
                        chosen.insert(key, obs);
                    }
                }
            }
        }

        let deduped = observations.len() - order.len();
        let mut upserts = Vec::with_capacity(order.len());
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        for key in &order {
            if let Some(obs) = chosen.get(key) {
                match self.apply_upsert(obs, now) {
                    Ok(outcome) => upserts.push(outcome),
                    Err(err) => {
                        self.conn.execute_batch("ROLLBACK").ok();
                        return Err(err);
                    }
                }
            }
        }
        self.conn.execute_batch("COMMIT")?;
        debug!(batch = observations.len(), applied = upserts.len(), deduped, "batch upsert done");
        Ok(BatchOutcome { upserts, deduped })
    }

    /// Close an episode and derive days-missed from the start timestamp.
    /// Unknown ids and already-closed episodes are rejected.
    pub fn resolve(&mut self, episode_id: i64, end: DateTime<Utc>) -> Result<i64> {
        let row = self
            .conn
            .query_row(
                "SELECT player_key, player_name, start_at, end_at FROM episodes WHERE id = ?1",
                params![episode_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;

        let (player_key, player_name, start_raw, end_raw) =
            row.ok_or(CoreError::EpisodeNotFound(episode_id))?;
        if end_raw.is_some() {
            return Err(CoreError::AlreadyResolved(episode_id));
        }

        let start = parse_ts(&start_raw);
        let days_missed = (end - start).num_days();
        self.conn.execute(
            "UPDATE episodes SET end_at = ?1, days_missed = ?2, updated_at = ?3 WHERE id = ?4",
            params![ts(end), days_missed, ts(Utc::now()), episode_id],
        )?;
        debug!(episode_id, days_missed, "episode resolved");
        self.recompute_summary_keyed(&player_key, &player_name, Utc::now())?;
        Ok(days_missed)
    }

    pub fn episode(&self, episode_id: i64) -> Result<Option<InjuryEpisode>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, player_name, position, team, status, body_part, notes, start_at,
                        end_at, days_missed, season, week, source, created_at, updated_at
                 FROM episodes WHERE id = ?1",
                params![episode_id],
                episode_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// All episodes for a player, newest start first.
    pub fn history(&self, player_name: &str) -> Result<Vec<InjuryEpisode>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, player_name, position, team, status, body_part, notes, start_at, end_at,
                    days_missed, season, week, source, created_at, updated_at
             FROM episodes WHERE player_key = ?1
             ORDER BY start_at DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![normalize_player_name(player_name)], episode_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Body part -> episode count for a player (open and closed alike).
    pub fn recurrence(&self, player_name: &str) -> Result<HashMap<String, u32>> {
        let mut stmt = self.conn.prepare(
            "SELECT body_part, COUNT(*) FROM episodes
             WHERE player_key = ?1 AND body_part IS NOT NULL
             GROUP BY body_part",
        )?;
        let rows = stmt.query_map(params![normalize_player_name(player_name)], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
        })?;
        let mut out = HashMap::new();
        for row in rows {
            let (part, count) = row?;
            out.insert(part, count);
        }
        Ok(out)
    }

    /// Episode counts by body part inside a trailing window, descending.
    pub fn trends(&self, window_days: u32, now: DateTime<Utc>) -> Result<InjuryTrends> {
        let cutoff = ts(now - chrono::Duration::days(i64::from(window_days)));
        let total: u32 = self.conn.query_row(
            "SELECT COUNT(*) FROM episodes WHERE start_at >= ?1",
            params![cutoff],
            |row| row.get(0),
        )?;
        let mut stmt = self.conn.prepare(
            "SELECT body_part, COUNT(*) AS n FROM episodes
             WHERE start_at >= ?1 AND body_part IS NOT NULL
             GROUP BY body_part ORDER BY n DESC, body_part ASC",
        )?;
        let rows = stmt.query_map(params![cutoff], |row| {
            Ok(BodyPartCount { body_part: row.get(0)?, count: row.get(1)? })
        })?;
        let mut body_parts = Vec::new();
        for row in rows {
            body_parts.push(row?);
        }
        Ok(InjuryTrends { window_days, total_episodes: total, body_parts })
    }

    /// Deterministic full rebuild of the player's materialized summary.
    pub fn recompute_summary(&mut self, player_name: &str) -> Result<PlayerSummary> {
        self.recompute_summary_keyed(&normalize_player_name(player_name), player_name, Utc::now())
    }

    pub fn player_summary(&self, player_name: &str) -> Result<Option<PlayerSummary>> {
        let row = self
            .conn
            .query_row(
                "SELECT player_name, total_episodes, total_days_missed, recurring_body_parts,
                        last_injury_start, injury_prone_score, updated_at
                 FROM player_summary WHERE player_key = ?1",
                params![normalize_player_name(player_name)],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, f64>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(name, total, days, recurring_raw, last, score, updated)| PlayerSummary {
            player_name: name,
            total_episodes: total,
            total_days_missed: days,
            recurring_body_parts: recurring_raw
                .and_then(|raw| serde_json::from_str(&raw).ok())
                .unwrap_or_default(),
            last_injury_start: last.as_deref().map(parse_ts),
            injury_prone_score: score,
            updated_at: parse_ts(&updated),
        }))
    }

    /// Closed episodes sharing body part and position, most recent first.
    /// Human comparison material, never part of the numeric estimate.
    pub fn similar_episodes(
        &self,
        body_part: &str,
        position: &str,
        limit: u32,
    ) -> Result<Vec<InjuryEpisode>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, player_name, position, team, status, body_part, notes, start_at, end_at,
                    days_missed, season, week, source, created_at, updated_at
             FROM episodes
             WHERE body_part = ?1 AND position = ?2 AND days_missed IS NOT NULL
             ORDER BY start_at DESC, id DESC LIMIT ?3",
        )?;
        let rows =
            stmt.query_map(params![normalize_body_part(body_part), position, limit], episode_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Mean recorded recovery for an injury type, optionally narrowed by
    /// status. Feeds the rule-only estimator.
    pub fn average_recovery(
        &self,
        body_part: &str,
        status: Option<InjuryStatus>,
    ) -> Result<Option<f64>> {
        let part = normalize_body_part(body_part);
        let avg: Option<f64> = match status {
            Some(status) => self.conn.query_row(
                "SELECT AVG(days_missed) FROM episodes
                 WHERE body_part = ?1 AND status = ?2 AND days_missed IS NOT NULL",
                params![part, status],
                |row| row.get(0),
            )?,
            None => self.conn.query_row(
                "SELECT AVG(days_missed) FROM episodes
                 WHERE body_part = ?1 AND days_missed IS NOT NULL",
                params![part],
                |row| row.get(0),
            )?,
        };
        Ok(avg)
    }

    /// Audit trail for one episode, oldest first.
    pub fn status_changes(&self, episode_id: i64) -> Result<Vec<StatusChange>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, episode_id, old_status, new_status, changed_at
             FROM status_changes WHERE episode_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![episode_id], |row| {
            Ok(StatusChange {
                id: row.get(0)?,
                episode_id: row.get(1)?,
                old_status: row.get(2)?,
                new_status: row.get(3)?,
                changed_at: parse_ts(&row.get::<_, String>(4)?),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Every closed episode eligible for training: positive days-missed and a
    /// known body part, joined with the player's counts.
    pub fn training_episodes(&self) -> Result<Vec<TrainingEpisode>> {
        let mut stmt = self.conn.prepare(
            "SELECT e.body_part, e.position, e.status, e.days_missed, e.week,
                    (SELECT COUNT(*) FROM episodes h WHERE h.player_key = e.player_key),
                    (SELECT COUNT(*) FROM episodes r
                      WHERE r.player_key = e.player_key AND r.body_part = e.body_part)
             FROM episodes e
             WHERE e.days_missed IS NOT NULL AND e.days_missed > 0
               AND e.body_part IS NOT NULL",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(TrainingEpisode {
                body_part: row.get(0)?,
                position: row.get(1)?,
                status: row.get(2)?,
                days_missed: row.get(3)?,
                week: row.get(4)?,
                player_episode_count: row.get(5)?,
                body_part_recurrence: row.get(6)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn open_episodes_for(&self, player_key: &str, body_norm: Option<&str>) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM episodes
             WHERE player_key = ?1 AND end_at IS NULL AND IFNULL(body_part, '') = ?2
             ORDER BY id DESC",
        )?;
        let rows = stmt.query_map(params![player_key, body_norm.unwrap_or("")], |row| row.get(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn recompute_summary_keyed(
        &mut self,
        player_key: &str,
        player_name: &str,
        now: DateTime<Utc>,
    ) -> Result<PlayerSummary> {
        let (total, days, last): (u32, i64, Option<String>) = self.conn.query_row(
            "SELECT COUNT(*), SUM(COALESCE(days_missed, 0)), MAX(start_at)
             FROM episodes WHERE player_key = ?1",
            params![player_key],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                    row.get(2)?,
                ))
            },
        )?;

        let recurring = self.recurrence(player_name)?;
        let recurring_parts = recurring.values().filter(|&&n| n > 1).count() as f64;
        let injury_prone_score =
            (f64::from(total) * 10.0 + days as f64 / 7.0 + recurring_parts * 15.0).min(100.0);

        let summary = PlayerSummary {
            player_name: player_name.to_string(),
            total_episodes: total,
            total_days_missed: days,
            recurring_body_parts: recurring,
            last_injury_start: last.as_deref().map(parse_ts),
            injury_prone_score,
            updated_at: now,
        };

        let recurring_json = serde_json::to_string(&summary.recurring_body_parts)
            .unwrap_or_else(|_| "{}".to_string());
        self.conn.execute(
            "INSERT INTO player_summary (
                player_key, player_name, total_episodes, total_days_missed,
                recurring_body_parts, last_injury_start, injury_prone_score, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(player_key) DO UPDATE SET
                player_name = excluded.player_name,
                total_episodes = excluded.total_episodes,
                total_days_missed = excluded.total_days_missed,
                recurring_body_parts = excluded.recurring_body_parts,
                last_injury_start = excluded.last_injury_start,
                injury_prone_score = excluded.injury_prone_score,
                updated_at = excluded.updated_at",
            params![
                player_key,
                summary.player_name,
                summary.total_episodes,
                summary.total_days_missed,
                recurring_json,
                summary.last_injury_start.map(ts),
                summary.injury_prone_score,
                ts(summary.updated_at),
            ],
        )?;
        Ok(summary)
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS episodes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            player_key TEXT NOT NULL,
            player_name TEXT NOT NULL,
            position TEXT NOT NULL,
            team TEXT NOT NULL,
            status TEXT NOT NULL,
            body_part TEXT NULL,
            notes TEXT NULL,
            start_at TEXT NOT NULL,
            end_at TEXT NULL,
            days_missed INTEGER NULL,
            season INTEGER NOT NULL,
            week INTEGER NOT NULL,
            source TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_episodes_player ON episodes(player_key);
        CREATE INDEX IF NOT EXISTS idx_episodes_dates ON episodes(start_at, end_at);
        CREATE INDEX IF NOT EXISTS idx_episodes_body_part ON episodes(body_part);

        CREATE TABLE IF NOT EXISTS status_changes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            episode_id INTEGER NOT NULL REFERENCES episodes(id),
            old_status TEXT NOT NULL,
            new_status TEXT NOT NULL,
            changed_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS player_summary (
            player_key TEXT PRIMARY KEY,
            player_name TEXT NOT NULL,
            total_episodes INTEGER NOT NULL DEFAULT 0,
            total_days_missed INTEGER NOT NULL DEFAULT 0,
            recurring_body_parts TEXT NULL,
            last_injury_start TEXT NULL,
            injury_prone_score REAL NOT NULL DEFAULT 0.0,
            updated_at TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

fn episode_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<InjuryEpisode> {
    Ok(InjuryEpisode {
        id: row.get(0)?,
        player_name: row.get(1)?,
        position: row.get(2)?,
        team: row.get(3)?,
        status: row.get(4)?,
        body_part: row.get(5)?,
        notes: row.get(6)?,
        start: parse_ts(&row.get::<_, String>(7)?),
        end: row.get::<_, Option<String>>(8)?.as_deref().map(parse_ts),
        days_missed: row.get(9)?,
        season: row.get(10)?,
        week: row.get(11)?,
        source: row.get(12)?,
        created_at: parse_ts(&row.get::<_, String>(13)?),
        updated_at: parse_ts(&row.get::<_, String>(14)?),
    })
}

fn normalized_body_part_opt(raw: Option<&str>) -> Option<String> {
    let part = normalize_body_part(raw?);
    if part.is_empty() {
        None
    } else {
        Some(part)
    }
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn obs(player: &str, status: InjuryStatus, body_part: Option<&str>) -> InjuryObservation {
        InjuryObservation {
            player_name: player.to_string(),
            position: "RB".to_string(),
            team: "SF".to_string(),
            status,
            body_part: body_part.map(|s| s.to_string()),
            notes: None,
            start: None,
            source: "test".to_string(),
        }
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn upsert_reuses_open_episode_and_logs_change() {
        let mut store = EpisodeStore::open_in_memory().unwrap();
        let now = at(2025, 10, 1);

        let a = store
            .upsert_at(&obs("C. McCaffrey", InjuryStatus::Questionable, Some("Calf")), now)
            .unwrap();
        assert_eq!(a.action, UpsertAction::Inserted);

        let b = store
            .upsert_at(&obs("C. McCaffrey", InjuryStatus::Questionable, Some("calf")), now)
            .unwrap();
        assert_eq!(b.episode_id, a.episode_id);
        assert_eq!(b.action, UpsertAction::Unchanged);

        let c = store
            .upsert_at(&obs("C. McCaffrey", InjuryStatus::Out, Some("CALF ")), now)
            .unwrap();
        assert_eq!(c.episode_id, a.episode_id);
        assert!(matches!(c.action, UpsertAction::StatusChanged { from: InjuryStatus::Questionable }));

        let changes = store.status_changes(a.episode_id).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].old_status, InjuryStatus::Questionable);
        assert_eq!(changes[0].new_status, InjuryStatus::Out);
    }

    #[test]
    fn distinct_body_parts_open_independent_episodes() {
        let mut store = EpisodeStore::open_in_memory().unwrap();
        let now = at(2025, 10, 1);
        let a = store.upsert_at(&obs("A. Kamara", InjuryStatus::Out, Some("Ankle")), now).unwrap();
        let b = store.upsert_at(&obs("A. Kamara", InjuryStatus::Out, Some("Ribs")), now).unwrap();
        assert_ne!(a.episode_id, b.episode_id);
        assert_eq!(store.history("A. Kamara").unwrap().len(), 2);
    }

    #[test]
    fn resolve_computes_days_and_rejects_twice() {
        let mut store = EpisodeStore::open_in_memory().unwrap();
        let start = at(2025, 9, 10);
        let mut o = obs("J. Chase", InjuryStatus::Out, Some("Hamstring"));
        o.start = Some(start);
        let id = store.upsert_at(&o, start).unwrap().episode_id;

        let days = store.resolve(id, at(2025, 9, 24)).unwrap();
        assert_eq!(days, 14);

        let err = store.resolve(id, at(2025, 9, 30)).unwrap_err();
        assert!(matches!(err, CoreError::AlreadyResolved(_)));

        let err = store.resolve(9999, at(2025, 9, 30)).unwrap_err();
        assert!(matches!(err, CoreError::EpisodeNotFound(9999)));
    }

    #[test]
    fn summary_rebuilds_after_mutations() {
        let mut store = EpisodeStore::open_in_memory().unwrap();
        let now = at(2025, 10, 1);
        let mut o = obs("D. Henry", InjuryStatus::Out, Some("Foot"));
        o.start = Some(at(2025, 9, 1));
        let id = store.upsert_at(&o, at(2025, 9, 1)).unwrap().episode_id;
        store.resolve(id, at(2025, 9, 15)).unwrap();
        store.upsert_at(&obs("D. Henry", InjuryStatus::Questionable, Some("Foot")), now).unwrap();

        let summary = store.player_summary("d. henry").unwrap().unwrap();
        assert_eq!(summary.total_episodes, 2);
        assert_eq!(summary.total_days_missed, 14);
        assert_eq!(summary.recurring_body_parts.get("foot"), Some(&2));
        assert!(summary.injury_prone_score > 0.0);
    }

    #[test]
    fn standalone_and_batch_upserts_interleave_cleanly() {
        let mut store = EpisodeStore::open_in_memory().unwrap();
        let now = at(2025, 10, 1);

        // Standalone upsert commits its own transaction.
        let a = store
            .upsert_at(&obs("T. Hill", InjuryStatus::Questionable, Some("Ankle")), now)
            .unwrap();
        assert_eq!(a.action, UpsertAction::Inserted);

        // A batch right after must open its own transaction without tripping
        // over the standalone one, and the audit row lands with its update.
        let batch = [obs("T. Hill", InjuryStatus::Out, Some("ankle"))];
        let outcome = store.upsert_batch_at(&batch, now).unwrap();
        assert_eq!(outcome.upserts.len(), 1);
        assert!(matches!(outcome.upserts[0].action, UpsertAction::StatusChanged { .. }));

        // And a standalone mutation again after the batch.
        let c = store.upsert_at(&obs("T. Hill", InjuryStatus::Ir, Some("Ankle")), now).unwrap();
        assert_eq!(c.episode_id, a.episode_id);

        let changes = store.status_changes(a.episode_id).unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].new_status, InjuryStatus::Out);
        assert_eq!(changes[1].new_status, InjuryStatus::Ir);
        let episode = store.episode(a.episode_id).unwrap().unwrap();
        assert_eq!(episode.status, InjuryStatus::Ir);
    }

    #[test]
    fn trends_respect_window() {
        let mut store = EpisodeStore::open_in_memory().unwrap();
        let mut old = obs("Old Timer", InjuryStatus::Out, Some("Knee"));
        old.start = Some(at(2025, 6, 1));
        store.upsert_at(&old, at(2025, 6, 1)).unwrap();
        let mut fresh = obs("New Guy", InjuryStatus::Out, Some("Knee"));
        fresh.start = Some(at(2025, 9, 28));
        store.upsert_at(&fresh, at(2025, 9, 28)).unwrap();

        let trends = store.trends(30, at(2025, 10, 1)).unwrap();
        assert_eq!(trends.total_episodes, 1);
        assert_eq!(trends.body_parts.len(), 1);
        assert_eq!(trends.body_parts[0].body_part, "knee");
        assert_eq!(trends.body_parts[0].count, 1);
    }
}
