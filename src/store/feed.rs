//! Per-source feed logs (`feeds/<slug>.jsonl`).

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{JsonlLog, RecordLog};
use crate::rss::FeedEntry;
use crate::TARGET_WEB_REQUEST;

/// Titles at or above this normalized similarity are treated as duplicates.
pub const TITLE_SIMILARITY_THRESHOLD: f64 = 0.9;

/// Directory of append-only feed logs, one per source.
#[derive(Debug, Clone)]
pub struct FeedStore {
    dir: PathBuf,
}

impl FeedStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FeedStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Log file for a source, named after its slug.
    pub fn path_for(&self, source_name: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", slugify(source_name)))
    }

    pub fn log_for(&self, source_name: &str) -> JsonlLog<FeedEntry> {
        JsonlLog::new(self.path_for(source_name))
    }

    /// Every `*.jsonl` log in the store, sorted by file name.
    pub fn feed_files(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for dir_entry in fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list {}", self.dir.display()))?
        {
            let path = dir_entry?.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Opened logs for every feed file, in `feed_files` order.
    pub fn logs(&self) -> Result<Vec<(String, JsonlLog<FeedEntry>)>> {
        Ok(self
            .feed_files()?
            .into_iter()
            .map(|path| {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                (name, JsonlLog::new(path))
            })
            .collect())
    }

    /// Appends the entries that are new to `log`: an entry is skipped when its
    /// id is already present, or when its title is a near-duplicate of a title
    /// already stored (including ones appended earlier in this call).
    ///
    /// Returns the number of appended entries.
    pub fn append_entries(log: &dyn RecordLog<FeedEntry>, entries: &[FeedEntry]) -> Result<usize> {
        let mut existing_ids: HashSet<String> = HashSet::new();
        let mut existing_titles: Vec<String> = Vec::new();
        for stored in log.scan()? {
            if !stored.title.is_empty() {
                existing_titles.push(stored.title);
            }
            existing_ids.insert(stored.id);
        }

        let mut appended = 0;
        for entry in entries {
            if existing_ids.contains(&entry.id) {
                continue;
            }
            if !entry.title.is_empty()
                && similar_title(&entry.title, &existing_titles, TITLE_SIMILARITY_THRESHOLD)
            {
                debug!(target: TARGET_WEB_REQUEST, "Skipping near-duplicate title in {}: {}", log.describe(), entry.title);
                continue;
            }
            log.append(entry)?;
            existing_ids.insert(entry.id.clone());
            if !entry.title.is_empty() {
                existing_titles.push(entry.title.clone());
            }
            appended += 1;
        }
        Ok(appended)
    }
}

/// Lowercases alphanumerics and replaces everything else with `_`.
pub fn slugify(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

/// True when `title` is at least `threshold` similar (case-insensitive,
/// normalized Levenshtein) to any of `existing`.
pub fn similar_title(title: &str, existing: &[String], threshold: f64) -> bool {
    let title = title.to_lowercase();
    existing
        .iter()
        .filter(|other| !other.is_empty())
        // edit-distance ratio, stricter than a matching-blocks ratio
        // (2*M/T) when the same words appear in a different order
        .any(|other| strsim::normalized_levenshtein(&title, &other.to_lowercase()) >= threshold)
}
