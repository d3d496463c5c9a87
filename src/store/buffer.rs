//! The Daily Buffer: scored and rendered entries waiting to be emailed.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use super::{JsonlLog, MemoryLog, RecordLog};

/// One entry ready for delivery, tagged with the UTC day it was produced on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferEntry {
    pub id: String,
    pub source: String,
    pub title: String,
    pub url: String,
    pub published: String,
    pub summary: String,
    pub content_html: String,
    pub score: f64,
    pub profile: String,
    /// `YYYY-MM-DD`, UTC.
    pub date: String,
    pub added_at: String,
}

impl BufferEntry {
    /// Source name used for quota accounting; unnamed sources share `"?"`.
    pub fn source_key(&self) -> &str {
        if self.source.is_empty() {
            "?"
        } else {
            &self.source
        }
    }
}

/// How much of today's quota is already used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DayCounts {
    pub total: usize,
    pub per_source: HashMap<String, usize>,
}

pub struct DailyBuffer {
    log: Box<dyn RecordLog<BufferEntry>>,
}

impl DailyBuffer {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        DailyBuffer {
            log: Box::new(JsonlLog::new(path)),
        }
    }

    pub fn in_memory() -> Self {
        DailyBuffer {
            log: Box::new(MemoryLog::new()),
        }
    }

    pub fn append(&self, entry: &BufferEntry) -> Result<()> {
        self.log.append(entry)
    }

    pub fn counts_for(&self, day: &str) -> Result<DayCounts> {
        let mut counts = DayCounts::default();
        for entry in self.log.scan()?.filter(|e| e.date == day) {
            counts.total += 1;
            *counts
                .per_source
                .entry(entry.source_key().to_string())
                .or_insert(0) += 1;
        }
        Ok(counts)
    }

    pub fn entries_for(&self, day: &str) -> Result<Vec<BufferEntry>> {
        Ok(self.log.scan()?.filter(|e| e.date == day).collect())
    }

    /// Removes the entries of `day` whose id is in `sent_ids`. Entries of other
    /// days, and entries appended after the caller read the buffer, are kept.
    pub fn prune_sent(&self, day: &str, sent_ids: &HashSet<String>) -> Result<usize> {
        self.log
            .retain(&mut |entry| !(entry.date == day && sent_ids.contains(&entry.id)))
    }
}
