use chrono::{DateTime, Datelike, NaiveDate, Utc};

pub const REGULAR_SEASON_WEEKS: u32 = 18;

/// NFL season year: September through December belong to the current
/// calendar year, January through August to the previous one.
pub fn season_year(now: DateTime<Utc>) -> i32 {
    if now.month() >= 9 {
        now.year()
    } else {
        now.year() - 1
    }
}

/// Simplified week number from calendar offset against a fixed September 1
/// season start, clamped to [1, 18]. Not bit-exact against published NFL
/// schedules; good enough for ordering and return-week estimates.
pub fn current_week(now: DateTime<Utc>) -> u32 {
    let start = season_start(season_year(now));
    let days = (now.date_naive() - start).num_days();
    if days < 0 {
        return 1;
    }
    ((days / 7) as u32 + 1).min(REGULAR_SEASON_WEEKS)
}

/// Fraction of the regular season elapsed, used as a model feature.
pub fn season_progress(week: u32) -> f64 {
    f64::from(week.min(REGULAR_SEASON_WEEKS)) / f64::from(REGULAR_SEASON_WEEKS)
}

/// Weeks left after the given week, floored at one (a season-ending report in
/// week 18 still costs at least a week).
pub fn weeks_remaining(week: u32) -> u32 {
    (REGULAR_SEASON_WEEKS.saturating_sub(week)).max(1)
}

fn season_start(year: i32) -> NaiveDate {
    // Sept 1 always exists; fall back to the epoch rather than panic.
    NaiveDate::from_ymd_opt(year, 9, 1).unwrap_or(NaiveDate::MIN)
}
