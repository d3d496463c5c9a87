//! Append-only record logs backing the Feed Store, History Ledger and Daily Buffer.
//!
//! Every log is a newline-delimited JSON file. Appends are single line writes;
//! the only non-append operation is `retain`, used to prune the Daily Buffer
//! after a send.

mod buffer;
mod day_lock;
mod fail_cache;
mod feed;
mod history;

pub use self::buffer::{BufferEntry, DailyBuffer, DayCounts};
pub use self::day_lock::DayLock;
pub use self::fail_cache::{domain_of, FailCache};
pub use self::feed::{similar_title, slugify, FeedStore, TITLE_SIMILARITY_THRESHOLD};
pub use self::history::{HistoryLedger, HistoryRecord};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::TARGET_PIPELINE;

/// Lazy sequence of decoded records.
pub type RecordIter<'a, T> = Box<dyn Iterator<Item = T> + Send + 'a>;

/// Storage contract shared by the file-backed and in-memory logs.
pub trait RecordLog<T>: Send + Sync {
    /// Appends one record as a single line.
    fn append(&self, record: &T) -> Result<()>;

    /// Streams every decodable record in insertion order. Blank, malformed or
    /// non-UTF-8 lines are skipped; the records after them are still read.
    fn scan(&self) -> Result<RecordIter<'_, T>>;

    /// Rewrites the log without the records rejected by `keep`, holding the
    /// write lock for the whole read-filter-write cycle so appends from this
    /// process cannot be lost. Lines that do not decode are kept verbatim.
    /// Returns the number removed.
    fn retain(&self, keep: &mut dyn FnMut(&T) -> bool) -> Result<usize>;

    /// Human-readable location, used in log messages.
    fn describe(&self) -> String;
}

/// A `RecordLog` stored as a JSONL file.
pub struct JsonlLog<T> {
    path: PathBuf,
    write_lock: Mutex<()>,
    _record: PhantomData<fn() -> T>,
}

impl<T> JsonlLog<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonlLog {
            path: path.into(),
            write_lock: Mutex::new(()),
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        Ok(())
    }
}

impl<T> RecordLog<T> for JsonlLog<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn append(&self, record: &T) -> Result<()> {
        let mut line = serde_json::to_string(record).context("Failed to encode record")?;
        line.push('\n');

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.ensure_parent()?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {} for append", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("Failed to append to {}", self.path.display()))?;
        Ok(())
    }

    fn scan(&self) -> Result<RecordIter<'_, T>> {
        if !self.path.exists() {
            return Ok(Box::new(std::iter::empty()));
        }
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        let path = self.path.clone();
        let read_path = self.path.clone();
        let records = BufReader::new(file)
            .split(b'\n')
            .map_while(move |line| match line {
                Ok(line) => Some(line),
                Err(err) => {
                    warn!(target: TARGET_PIPELINE, "Stopped reading {}: {}", read_path.display(), err);
                    None
                }
            })
            .filter_map(move |line| decode_line(&path, &line));
        Ok(Box::new(records))
    }

    fn retain(&self, keep: &mut dyn FnMut(&T) -> bool) -> Result<usize> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if !self.path.exists() {
            return Ok(0);
        }
        let raw = fs::read(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;

        let mut removed = 0;
        let mut body: Vec<u8> = Vec::with_capacity(raw.len());
        for line in raw.split(|b| *b == b'\n') {
            if let Some(record) = decode_line::<T>(&self.path, line) {
                if !keep(&record) {
                    removed += 1;
                    continue;
                }
            } else if line.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            body.extend_from_slice(line);
            body.push(b'\n');
        }
        if removed == 0 {
            return Ok(0);
        }

        fs::write(&self.path, body)
            .with_context(|| format!("Failed to rewrite {}", self.path.display()))?;
        Ok(removed)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

fn decode_line<T: DeserializeOwned>(path: &Path, line: &[u8]) -> Option<T> {
    let line = match std::str::from_utf8(line) {
        Ok(line) => line.trim(),
        Err(err) => {
            debug!(target: TARGET_PIPELINE, "Skipping non-UTF-8 line in {}: {}", path.display(), err);
            return None;
        }
    };
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(record) => Some(record),
        Err(err) => {
            debug!(target: TARGET_PIPELINE, "Skipping malformed line in {}: {}", path.display(), err);
            None
        }
    }
}

/// In-memory `RecordLog`, interchangeable with `JsonlLog` in tests.
pub struct MemoryLog<T> {
    records: Mutex<Vec<T>>,
}

impl<T> Default for MemoryLog<T> {
    fn default() -> Self {
        MemoryLog::new()
    }
}

impl<T> MemoryLog<T> {
    pub fn new() -> Self {
        MemoryLog {
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn with_records(records: Vec<T>) -> Self {
        MemoryLog {
            records: Mutex::new(records),
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> RecordLog<T> for MemoryLog<T>
where
    T: Clone + Send + 'static,
{
    fn append(&self, record: &T) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }

    fn scan(&self) -> Result<RecordIter<'_, T>> {
        let snapshot = self.records.lock().unwrap_or_else(|e| e.into_inner()).clone();
        Ok(Box::new(snapshot.into_iter()))
    }

    fn retain(&self, keep: &mut dyn FnMut(&T) -> bool) -> Result<usize> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let before = records.len();
        records.retain(|record| keep(record));
        Ok(before - records.len())
    }

    fn describe(&self) -> String {
        "<memory>".to_string()
    }
}
