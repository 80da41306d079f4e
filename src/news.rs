//! Injury-news timeline analysis.
//!
//! Headlines routinely carry harder information than roster designations
//! ("out 4-6 weeks", "season-ending"). This module scans the pooled text of
//! a player's recent news and, when a rule fires, produces a timeline that
//! replaces the estimator's numbers. Rules are checked in a fixed priority
//! order; the first hit wins.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::injury::NewsItem;
use crate::schedule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideKind {
    ReturnImminent,
    SeasonEnding,
    SevereInjury,
    Surgery,
    TimelineExtracted,
    WeekToWeek,
    DayToDay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideSeverity {
    Low,
    Moderate,
    High,
    Critical,
}

/// A news-derived timeline that supersedes the estimator's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineOverride {
    pub kind: OverrideKind,
    pub severity: OverrideSeverity,
    pub predicted_days: i64,
    pub confidence_low: i64,
    pub confidence_high: i64,
    /// Human-readable explanation quoting the triggering headline.
    pub reason: String,
    pub source_link: String,
}

const RETURN_KEYWORDS: &[&str] = &[
    "activated from",
    "designated to return",
    "removed from ir",
    "expected to play",
    "cleared to play",
    "will play",
    "practicing fully",
    "full participant",
    "ready to return",
];

const SEASON_ENDING_KEYWORDS: &[&str] = &[
    "season-ending",
    "out for season",
    "done for year",
    "ruled out for remainder",
    "will not return this season",
    "season is over",
    "shut down for season",
];

/// Known severe injuries with typical recovery in days. Order matters: the
/// first match wins, so the long-timeline tears sit ahead of the generic
/// fracture entries.
const SEVERE_INJURIES: &[(&str, i64)] = &[
    ("torn acl", 270),
    ("ruptured achilles", 270),
    ("achilles tear", 270),
    ("torn achilles", 270),
    ("fractured", 42),
    ("broken", 42),
    ("torn ligament", 180),
    ("mcl tear", 42),
    ("pcl tear", 90),
];

const SURGERY_KEYWORDS: &[&str] = &[
    "surgery scheduled",
    "underwent surgery",
    "will undergo surgery",
    "surgical procedure",
    "went under knife",
    "requires surgery",
];

const WEEK_TO_WEEK_KEYWORDS: &[&str] = &[
    "week-to-week",
    "week to week",
    "evaluated weekly",
    "no timetable",
    "indefinite",
    "day-to-day for now",
];

const DAY_TO_DAY_KEYWORDS: &[&str] = &[
    "day-to-day",
    "day to day",
    "game-time decision",
    "gametime decision",
    "questionable for",
    "doubtful for",
];

#[derive(Clone, Copy)]
enum PatternKind {
    RangeWeeks,
    ExactWeeks,
    RangeGames,
    ExactGames,
}

static TIMELINE_PATTERNS: Lazy<Vec<(Regex, PatternKind)>> = Lazy::new(|| {
    use PatternKind::*;
    let specs: &[(&str, PatternKind)] = &[
        (r"out (\d+)-(\d+) weeks?", RangeWeeks),
        (r"out (\d+) to (\d+) weeks?", RangeWeeks),
        (r"miss (\d+)-(\d+) weeks?", RangeWeeks),
        (r"miss (\d+) to (\d+) weeks?", RangeWeeks),
        (r"out (\d+) weeks?", ExactWeeks),
        (r"miss (\d+) weeks?", ExactWeeks),
        (r"(\d+)-(\d+) week", RangeWeeks),
        (r"out (\d+)-(\d+) games?", RangeGames),
        (r"miss (\d+)-(\d+) games?", RangeGames),
        (r"out (\d+) games?", ExactGames),
        (r"miss (\d+) games?", ExactGames),
        (r"(\d+) weeks? out", ExactWeeks),
        (r"(\d+) games? out", ExactGames),
    ];
    specs
        .iter()
        .filter_map(|&(pat, kind)| Regex::new(pat).ok().map(|re| (re, kind)))
        .collect()
});

/// Scan news for a timeline override. Items are expected newest-first; the
/// first item's headline is quoted in the reason string.
pub fn analyze(items: &[NewsItem]) -> Option<TimelineOverride> {
    analyze_at(items, Utc::now())
}

pub fn analyze_at(items: &[NewsItem], now: DateTime<Utc>) -> Option<TimelineOverride> {
    if items.is_empty() {
        return None;
    }
    let lead = &items[0];
    let mut text = String::new();
    for item in items {
        text.push_str(&item.title.to_lowercase());
        text.push(' ');
        text.push_str(&item.description.to_lowercase());
        text.push(' ');
    }

    check_return_imminent(&text, lead)
        .or_else(|| check_season_ending(&text, lead, now))
        .or_else(|| check_severe_injury(&text, lead))
        .or_else(|| check_surgery(&text, lead))
        .or_else(|| extract_timeline(&text, lead))
        .or_else(|| check_week_to_week(&text, lead))
        .or_else(|| check_day_to_day(&text, lead))
}

fn link_of(item: &NewsItem) -> String {
    item.link.clone()
}

fn check_return_imminent(text: &str, lead: &NewsItem) -> Option<TimelineOverride> {
    RETURN_KEYWORDS.iter().find(|k| text.contains(**k)).map(|_| TimelineOverride {
        kind: OverrideKind::ReturnImminent,
        severity: OverrideSeverity::Low,
        predicted_days: 3,
        confidence_low: 0,
        confidence_high: 7,
        reason: format!("Return imminent: \"{}\"", lead.title),
        source_link: link_of(lead),
    })
}

fn check_season_ending(text: &str, lead: &NewsItem, now: DateTime<Utc>) -> Option<TimelineOverride> {
    SEASON_ENDING_KEYWORDS.iter().find(|k| text.contains(**k)).map(|_| {
        let remaining = i64::from(schedule::weeks_remaining(schedule::current_week(now)));
        TimelineOverride {
            kind: OverrideKind::SeasonEnding,
            severity: OverrideSeverity::Critical,
            predicted_days: remaining * 7,
            confidence_low: remaining * 7,
            // Could extend into next season.
            confidence_high: 365,
            reason: format!("News reports season-ending injury: \"{}\"", lead.title),
            source_link: link_of(lead),
        }
    })
}

fn check_severe_injury(text: &str, lead: &NewsItem) -> Option<TimelineOverride> {
    SEVERE_INJURIES.iter().find(|(k, _)| text.contains(k)).map(|(keyword, days)| {
        TimelineOverride {
            kind: OverrideKind::SevereInjury,
            severity: OverrideSeverity::Critical,
            predicted_days: *days,
            confidence_low: days - 14,
            confidence_high: days + 30,
            reason: format!("Severe injury reported ({}): \"{}\"", keyword, lead.title),
            source_link: link_of(lead),
        }
    })
}

fn check_surgery(text: &str, lead: &NewsItem) -> Option<TimelineOverride> {
    let min_days: i64 = if text.contains("minor surgery") || text.contains("arthroscopic") {
        21
    } else {
        42
    };
    SURGERY_KEYWORDS.iter().find(|k| text.contains(**k)).map(|_| TimelineOverride {
        kind: OverrideKind::Surgery,
        severity: OverrideSeverity::High,
        predicted_days: min_days,
        confidence_low: min_days,
        confidence_high: min_days + 28,
        reason: format!("Surgery reported: \"{}\"", lead.title),
        source_link: link_of(lead),
    })
}

fn extract_timeline(text: &str, lead: &NewsItem) -> Option<TimelineOverride> {
    for (regex, kind) in TIMELINE_PATTERNS.iter() {
        let Some(caps) = regex.captures(text) else { continue };
        let first: i64 = caps.get(1).and_then(|m| m.as_str().parse().ok())?;
        match kind {
            PatternKind::RangeWeeks | PatternKind::RangeGames => {
                let second: i64 = caps.get(2).and_then(|m| m.as_str().parse().ok())?;
                let unit = match kind {
                    PatternKind::RangeGames => "games",
                    _ => "weeks",
                };
                // Midpoint of the reported range; bounds are taken literally.
                let predicted_days = (first + second) * 7 / 2;
                return Some(TimelineOverride {
                    kind: OverrideKind::TimelineExtracted,
                    severity: OverrideSeverity::Moderate,
                    predicted_days,
                    confidence_low: first * 7,
                    confidence_high: second * 7,
                    reason: format!(
                        "Timeline reported: {}-{} {}: \"{}\"",
                        first, second, unit, lead.title
                    ),
                    source_link: link_of(lead),
                });
            }
            PatternKind::ExactWeeks | PatternKind::ExactGames => {
                let unit = match kind {
                    PatternKind::ExactGames => "games",
                    _ => "weeks",
                };
                let predicted_days = first * 7;
                return Some(TimelineOverride {
                    kind: OverrideKind::TimelineExtracted,
                    severity: OverrideSeverity::Moderate,
                    predicted_days,
                    confidence_low: (predicted_days - 7).max(1),
                    confidence_high: predicted_days + 7,
                    reason: format!("Timeline reported: {} {}: \"{}\"", first, unit, lead.title),
                    source_link: link_of(lead),
                });
            }
        }
    }
    None
}

fn check_week_to_week(text: &str, lead: &NewsItem) -> Option<TimelineOverride> {
    WEEK_TO_WEEK_KEYWORDS.iter().find(|k| text.contains(**k)).map(|_| TimelineOverride {
        kind: OverrideKind::WeekToWeek,
        severity: OverrideSeverity::Moderate,
        predicted_days: 14,
        confidence_low: 7,
        confidence_high: 21,
        reason: format!("Timeline uncertain (week-to-week): \"{}\"", lead.title),
        source_link: link_of(lead),
    })
}

fn check_day_to_day(text: &str, lead: &NewsItem) -> Option<TimelineOverride> {
    DAY_TO_DAY_KEYWORDS.iter().find(|k| text.contains(**k)).map(|_| TimelineOverride {
        kind: OverrideKind::DayToDay,
        severity: OverrideSeverity::Low,
        predicted_days: 3,
        confidence_low: 1,
        confidence_high: 7,
        reason: format!("Short-term (day-to-day): \"{}\"", lead.title),
        source_link: link_of(lead),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(title: &str, description: &str) -> NewsItem {
        NewsItem {
            title: title.to_string(),
            description: description.to_string(),
            link: "https://example.com/story".to_string(),
            published: None,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn empty_feed_yields_nothing() {
        assert!(analyze_at(&[], now()).is_none());
    }

    #[test]
    fn range_timeline_extracted() {
        let items = [item(
            "Jefferson expected to miss 4-6 weeks with hamstring",
            "Suffered grade 2 hamstring strain",
        )];
        let ov = analyze_at(&items, now()).unwrap();
        assert_eq!(ov.kind, OverrideKind::TimelineExtracted);
        assert_eq!(ov.predicted_days, 35);
        assert_eq!(ov.confidence_low, 28);
        assert_eq!(ov.confidence_high, 42);
        assert!(ov.reason.contains("Jefferson expected to miss 4-6 weeks"));
    }

    #[test]
    fn season_ending_beats_day_to_day() {
        let items = [item(
            "McCaffrey ruled out for season, had been day-to-day",
            "Will undergo season-ending surgery",
        )];
        let ov = analyze_at(&items, now()).unwrap();
        assert_eq!(ov.kind, OverrideKind::SeasonEnding);
        assert_eq!(ov.severity, OverrideSeverity::Critical);
        // Week 7 on Oct 15: 11 weeks left.
        assert_eq!(ov.predicted_days, 77);
        assert_eq!(ov.confidence_high, 365);
    }

    #[test]
    fn return_imminent_wins_over_everything() {
        let items = [item(
            "Mixon designated to return from IR after fractured ankle",
            "Practicing and could play this week",
        )];
        let ov = analyze_at(&items, now()).unwrap();
        assert_eq!(ov.kind, OverrideKind::ReturnImminent);
        assert_eq!(ov.predicted_days, 3);
    }

    #[test]
    fn severe_injury_table_applies() {
        let items = [item("Rodgers suffers torn achilles", "Out indefinitely")];
        let ov = analyze_at(&items, now()).unwrap();
        assert_eq!(ov.kind, OverrideKind::SevereInjury);
        assert_eq!(ov.predicted_days, 270);
        assert_eq!(ov.confidence_low, 256);
        assert_eq!(ov.confidence_high, 300);
    }

    #[test]
    fn arthroscopic_surgery_gets_the_short_table() {
        let items = [item(
            "Chase underwent surgery on knee",
            "Arthroscopic procedure, considered minor",
        )];
        let ov = analyze_at(&items, now()).unwrap();
        assert_eq!(ov.kind, OverrideKind::Surgery);
        assert_eq!(ov.predicted_days, 21);
        assert_eq!(ov.confidence_high, 49);
    }

    #[test]
    fn vague_phrases_fall_through_in_order() {
        let wk = analyze_at(&[item("Henry week-to-week with foot injury", "")], now()).unwrap();
        assert_eq!(wk.kind, OverrideKind::WeekToWeek);
        assert_eq!(wk.predicted_days, 14);

        let dd = analyze_at(&[item("Kupp listed as day-to-day", "")], now()).unwrap();
        assert_eq!(dd.kind, OverrideKind::DayToDay);
        assert_eq!(dd.predicted_days, 3);

        // "day-to-day for now" signals uncertainty, not a short absence.
        let amb = analyze_at(&[item("Coach says Adams is day-to-day for now", "")], now()).unwrap();
        assert_eq!(amb.kind, OverrideKind::WeekToWeek);
    }

    #[test]
    fn plain_injury_news_has_no_override() {
        let items = [item("Jets sign veteran linebacker", "Depth move after injuries")];
        assert!(analyze_at(&items, now()).is_none());
    }
}
