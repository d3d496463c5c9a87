//! Heuristic relevance score for a feed entry under a profile.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::profile::ScoringProfile;
use crate::rss::{parse_date, FeedEntry};

static POINTS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Points:\s*(\d+)").expect("valid points regex"));
static COMMENTS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)#\s*Comments:\s*(\d+)").expect("valid comments regex"));

/// Engagement counts embedded in aggregator summaries (`Points: 120`,
/// `# Comments: 33`). Missing or unparsable counts are 0.
pub fn parse_points_comments(summary: &str) -> (u64, u64) {
    let capture = |re: &Regex| {
        re.captures(summary)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .unwrap_or(0)
    };
    (capture(&POINTS_RE), capture(&COMMENTS_RE))
}

/// Additive score of freshness, engagement, body length and keyword hits.
///
/// Pure in its inputs: `now` is the only clock the freshness term sees.
pub fn compute_score(entry: &FeedEntry, profile: &ScoringProfile, now: DateTime<Utc>) -> f64 {
    let mut score = 0.0;

    if !entry.published.is_empty() {
        match parse_date(&entry.published) {
            Some(published) => {
                let hours = (now - published).num_milliseconds() as f64 / 3_600_000.0;
                if hours <= 24.0 {
                    score += 3.0;
                } else if hours <= 48.0 {
                    score += 1.0;
                } else {
                    score -= 3.0;
                }
            }
            None => score -= 1.0,
        }
    }

    let (points, comments) = parse_points_comments(&entry.summary);
    if points >= 50 {
        score += 3.0;
    } else if points >= 20 {
        score += 1.0;
    }
    if comments >= 20 {
        score += 2.0;
    } else if comments >= 5 {
        score += 1.0;
    }

    let length = entry.content.chars().count();
    if length < 400 {
        score -= 2.0;
    } else if length > 1200 {
        score += 1.0;
    }

    let text = format!("{} {}", entry.title, entry.summary).to_lowercase();
    let hits = |keywords: &[String]| {
        keywords
            .iter()
            .map(|kw| kw.to_lowercase())
            .filter(|kw| !kw.is_empty() && text.contains(kw.as_str()))
            .count() as f64
    };
    score += 2.0 * hits(&profile.keywords_positive);
    score -= 3.0 * hits(&profile.keywords_negative);

    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap()
    }

    fn entry(published: &str, summary: &str, content_len: usize) -> FeedEntry {
        FeedEntry {
            id: "e".to_string(),
            source: "s".to_string(),
            title: "A title".to_string(),
            published: published.to_string(),
            summary: summary.to_string(),
            content: "x".repeat(content_len),
            ..Default::default()
        }
    }

    fn hours_ago(h: i64) -> String {
        (now() - Duration::hours(h)).to_rfc3339()
    }

    #[test]
    fn test_parse_points_comments() {
        assert_eq!(parse_points_comments("Points: 120 # Comments: 33"), (120, 33));
        assert_eq!(parse_points_comments("points:7 #comments: 2"), (7, 2));
        assert_eq!(parse_points_comments("nothing here"), (0, 0));
    }

    #[test]
    fn test_freshness_terms() {
        let profile = ScoringProfile::default();
        // 800 chars keeps the length term at zero
        assert_eq!(compute_score(&entry(&hours_ago(2), "", 800), &profile, now()), 3.0);
        assert_eq!(compute_score(&entry(&hours_ago(24), "", 800), &profile, now()), 3.0);
        assert_eq!(compute_score(&entry(&hours_ago(30), "", 800), &profile, now()), 1.0);
        assert_eq!(compute_score(&entry(&hours_ago(72), "", 800), &profile, now()), -3.0);
        assert_eq!(compute_score(&entry("yesterday-ish", "", 800), &profile, now()), -1.0);
        assert_eq!(compute_score(&entry("", "", 800), &profile, now()), 0.0);
    }

    #[test]
    fn test_engagement_and_length_terms() {
        let profile = ScoringProfile::default();
        let e = entry("", "Points: 55 # Comments: 21", 1500);
        assert_eq!(compute_score(&e, &profile, now()), 3.0 + 2.0 + 1.0);
        let e = entry("", "Points: 20 # Comments: 5", 100);
        assert_eq!(compute_score(&e, &profile, now()), 1.0 + 1.0 - 2.0);
    }

    #[test]
    fn test_keyword_terms() {
        let profile = ScoringProfile {
            keywords_positive: vec!["Rust".to_string(), "".to_string(), "tokio".to_string()],
            keywords_negative: vec!["crypto".to_string()],
            ..Default::default()
        };
        let mut e = entry("", "Async RUST with Tokio", 800);
        assert_eq!(compute_score(&e, &profile, now()), 4.0);
        e.title = "Crypto winter".to_string();
        assert_eq!(compute_score(&e, &profile, now()), 1.0);
    }

    #[test]
    fn test_score_is_deterministic() {
        let profile = ScoringProfile {
            keywords_positive: vec!["rust".to_string()],
            ..Default::default()
        };
        let e = entry(&hours_ago(5), "rust Points: 60", 1300);
        let first = compute_score(&e, &profile, now());
        let second = compute_score(&e, &profile, now());
        assert_eq!(first.to_bits(), second.to_bits());
    }
}
