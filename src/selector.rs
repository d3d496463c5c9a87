//! Candidate selection: merges the Feed Store fairly, filters out adjudicated
//! entries, scores the rest and enforces the daily quotas.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::profile::ScoringProfile;
use crate::rss::FeedEntry;
use crate::scoring::compute_score;
use crate::store::{DailyBuffer, HistoryLedger, RecordIter, RecordLog};
use crate::{utc_day, TARGET_PIPELINE};

/// Interleaves several record streams breadth-first: one item from every
/// non-exhausted stream per round, in stream order.
pub struct RoundRobin<'a, T> {
    cursors: Vec<(String, RecordIter<'a, T>)>,
    next: usize,
}

impl<'a, T> RoundRobin<'a, T> {
    pub fn new(cursors: Vec<(String, RecordIter<'a, T>)>) -> Self {
        RoundRobin { cursors, next: 0 }
    }
}

impl<T> Iterator for RoundRobin<'_, T> {
    type Item = (String, T);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.cursors.is_empty() {
                return None;
            }
            if self.next >= self.cursors.len() {
                self.next = 0;
            }
            let idx = self.next;
            match self.cursors[idx].1.next() {
                Some(item) => {
                    self.next = idx + 1;
                    return Some((self.cursors[idx].0.clone(), item));
                }
                None => {
                    // the following cursor slides into `idx`
                    self.cursors.remove(idx);
                }
            }
        }
    }
}

/// An unadjudicated entry that met the profile threshold.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub score: f64,
    pub entry: FeedEntry,
    /// File name of the feed log the entry came from.
    pub source_file: String,
}

/// Result of one selection round.
#[derive(Debug, Default)]
pub struct Selection {
    /// Global slots left today before selection.
    pub remaining_global: usize,
    /// Entries not yet in History that were scored.
    pub scored: usize,
    /// Entries scored below `min_score` and written to History.
    pub rejected: usize,
    /// Entries that met the threshold.
    pub candidates: usize,
    /// Chosen entries, best score first.
    pub selected: Vec<Candidate>,
}

impl Selection {
    pub fn quota_exhausted(&self) -> bool {
        self.remaining_global == 0
    }
}

pub struct CandidateSelector<'a> {
    pub profile: &'a ScoringProfile,
    pub history: &'a HistoryLedger,
    pub buffer: &'a DailyBuffer,
    pub max_posts_per_day: usize,
    pub now: DateTime<Utc>,
}

impl CandidateSelector<'_> {
    /// Runs one selection round over `logs` (in the given order).
    ///
    /// Entries scoring below the profile threshold are recorded in History
    /// immediately and never reconsidered. Entries with an empty id are
    /// ignored entirely.
    pub fn select<L>(&self, logs: &[(String, L)]) -> Result<Selection>
    where
        L: RecordLog<FeedEntry>,
    {
        let today = utc_day(self.now);
        let counts = self.buffer.counts_for(&today)?;
        let mut selection = Selection {
            remaining_global: self.max_posts_per_day.saturating_sub(counts.total),
            ..Default::default()
        };
        if selection.quota_exhausted() {
            info!(target: TARGET_PIPELINE, "Daily limit of {} posts already used", self.max_posts_per_day);
            return Ok(selection);
        }

        let mut processed_ids = self.history.load_ids()?;
        let mut cursors = Vec::with_capacity(logs.len());
        for (name, log) in logs {
            cursors.push((name.clone(), log.scan()?));
        }

        let mut candidates: Vec<Candidate> = Vec::new();
        let mut queued: HashSet<String> = HashSet::new();
        for (source_file, entry) in RoundRobin::new(cursors) {
            if entry.id.is_empty()
                || processed_ids.contains(&entry.id)
                || queued.contains(&entry.id)
            {
                continue;
            }

            let score = compute_score(&entry, self.profile, self.now);
            selection.scored += 1;
            if score < self.profile.min_score {
                debug!(target: TARGET_PIPELINE, "Rejecting {} (score {:.1} < {:.1})", entry.id, score, self.profile.min_score);
                self.history.append(&entry.id)?;
                processed_ids.insert(entry.id);
                selection.rejected += 1;
                continue;
            }

            queued.insert(entry.id.clone());
            candidates.push(Candidate {
                score,
                entry,
                source_file,
            });
        }
        selection.candidates = candidates.len();

        // stable: equal scores keep round-robin order
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

        let mut per_source: HashMap<String, usize> = counts.per_source;
        for candidate in candidates {
            if selection.selected.len() >= selection.remaining_global {
                break;
            }
            let used = per_source
                .entry(candidate.entry.source_key().to_string())
                .or_insert(0);
            if *used >= self.profile.max_per_source {
                continue;
            }
            *used += 1;
            selection.selected.push(candidate);
        }

        info!(
            target: TARGET_PIPELINE,
            "Selected {} of {} candidates ({} rejected, {} slots left today)",
            selection.selected.len(),
            selection.candidates,
            selection.rejected,
            selection.remaining_global
        );
        Ok(selection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BufferEntry, MemoryLog};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap()
    }

    fn entry(source: &str, id: &str, title: &str) -> FeedEntry {
        FeedEntry {
            id: id.to_string(),
            source: source.to_string(),
            title: title.to_string(),
            url: format!("https://{}.example.com/{}", source, id),
            published: now().to_rfc3339(),
            ..Default::default()
        }
    }

    fn log(entries: Vec<FeedEntry>) -> MemoryLog<FeedEntry> {
        MemoryLog::with_records(entries)
    }

    fn ids(selection: &Selection) -> Vec<&str> {
        selection
            .selected
            .iter()
            .map(|c| c.entry.id.as_str())
            .collect()
    }

    #[test]
    fn test_round_robin_interleaves_breadth_first() {
        let streams: Vec<(String, RecordIter<'_, u32>)> = vec![
            ("a".to_string(), Box::new(vec![1, 2, 3].into_iter())),
            ("b".to_string(), Box::new(Vec::new().into_iter())),
            ("c".to_string(), Box::new(vec![10].into_iter())),
            ("d".to_string(), Box::new(vec![20, 21].into_iter())),
        ];
        let merged: Vec<(String, u32)> = RoundRobin::new(streams).collect();
        let order: Vec<u32> = merged.iter().map(|(_, n)| *n).collect();
        assert_eq!(order, vec![1, 10, 20, 2, 21, 3]);
        assert_eq!(merged[1].0, "c");
    }

    #[test]
    fn test_round_robin_first_rounds_take_one_per_log() {
        let sizes = [4usize, 2, 3];
        let streams: Vec<(String, RecordIter<'_, usize>)> = sizes
            .iter()
            .enumerate()
            .map(|(i, n)| {
                let items: Vec<usize> = (0..*n).map(|_| i).collect();
                (i.to_string(), Box::new(items.into_iter()) as RecordIter<'_, usize>)
            })
            .collect();
        let merged: Vec<usize> = RoundRobin::new(streams).map(|(_, i)| i).collect();
        assert_eq!(merged.len(), sizes.iter().sum::<usize>());
        for round in merged.chunks(3).take(2) {
            assert_eq!(round, &[0, 1, 2]);
        }
    }

    #[test]
    fn test_rejected_entries_are_never_reconsidered() {
        let profile = ScoringProfile {
            min_score: 0.0,
            keywords_negative: vec!["crypto".to_string()],
            ..Default::default()
        };
        let history = HistoryLedger::in_memory();
        let buffer = DailyBuffer::in_memory();
        let selector = CandidateSelector {
            profile: &profile,
            history: &history,
            buffer: &buffer,
            max_posts_per_day: 10,
            now: now(),
        };
        let logs = vec![(
            "news.jsonl".to_string(),
            log(vec![
                entry("news", "n1", "Crypto crash"),
                entry("news", "n2", "Compiler news"),
                entry("news", "", "No id at all"),
            ]),
        )];

        let first = selector.select(&logs).unwrap();
        assert_eq!(first.rejected, 1);
        assert_eq!(ids(&first), vec!["n2"]);
        assert!(history.load_ids().unwrap().contains("n1"));
        assert!(!history.load_ids().unwrap().contains(""));

        let second = selector.select(&logs).unwrap();
        assert_eq!(second.rejected, 0);
        assert!(!ids(&second).contains(&"n1"));
    }

    #[test]
    fn test_quota_and_per_source_caps() {
        let profile = ScoringProfile {
            max_per_source: 2,
            ..Default::default()
        };
        let history = HistoryLedger::in_memory();
        let buffer = DailyBuffer::in_memory();
        buffer
            .append(&BufferEntry {
                id: "earlier".to_string(),
                source: "a".to_string(),
                date: utc_day(now()),
                ..Default::default()
            })
            .unwrap();
        let selector = CandidateSelector {
            profile: &profile,
            history: &history,
            buffer: &buffer,
            max_posts_per_day: 3,
            now: now(),
        };
        let logs = vec![
            (
                "a.jsonl".to_string(),
                log((0..5).map(|i| entry("a", &format!("a{i}"), &format!("alpha {i}"))).collect()),
            ),
            (
                "b.jsonl".to_string(),
                log((0..5).map(|i| entry("b", &format!("b{i}"), &format!("beta {i}"))).collect()),
            ),
        ];

        let selection = selector.select(&logs).unwrap();
        assert_eq!(selection.remaining_global, 2);
        // one "a" already buffered today, so only one more fits
        assert_eq!(ids(&selection), vec!["a0", "b0"]);
    }

    #[test]
    fn test_exhausted_quota_is_a_no_op() {
        let profile = ScoringProfile {
            min_score: 100.0,
            ..Default::default()
        };
        let history = HistoryLedger::in_memory();
        let buffer = DailyBuffer::in_memory();
        let selector = CandidateSelector {
            profile: &profile,
            history: &history,
            buffer: &buffer,
            max_posts_per_day: 0,
            now: now(),
        };
        let logs = vec![("a.jsonl".to_string(), log(vec![entry("a", "a1", "x")]))];
        let selection = selector.select(&logs).unwrap();
        assert!(selection.quota_exhausted());
        assert_eq!(selection.scored, 0);
        assert!(history.load_ids().unwrap().is_empty());
    }

    #[test]
    fn test_higher_scores_first_with_stable_ties() {
        let profile = ScoringProfile {
            keywords_positive: vec!["rust".to_string()],
            max_per_source: 10,
            ..Default::default()
        };
        let history = HistoryLedger::in_memory();
        let buffer = DailyBuffer::in_memory();
        let selector = CandidateSelector {
            profile: &profile,
            history: &history,
            buffer: &buffer,
            max_posts_per_day: 10,
            now: now(),
        };
        let logs = vec![
            (
                "a.jsonl".to_string(),
                log(vec![entry("a", "a1", "plain"), entry("a", "a2", "rust tips")]),
            ),
            (
                "b.jsonl".to_string(),
                log(vec![entry("b", "b1", "plain too"), entry("b", "b2", "more")]),
            ),
        ];
        let selection = selector.select(&logs).unwrap();
        assert_eq!(ids(&selection), vec!["a2", "a1", "b1", "b2"]);
        assert_eq!(selection.selected[0].source_file, "a.jsonl");
    }
}
