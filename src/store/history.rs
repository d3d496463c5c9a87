//! Ledger of entry ids that have been fully adjudicated.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

use super::{JsonlLog, MemoryLog, RecordLog};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
}

/// Append-only set of processed ids. Once an id is recorded it is never
/// offered as a candidate again.
pub struct HistoryLedger {
    log: Box<dyn RecordLog<HistoryRecord>>,
}

impl HistoryLedger {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        HistoryLedger {
            log: Box::new(JsonlLog::new(path)),
        }
    }

    pub fn in_memory() -> Self {
        HistoryLedger {
            log: Box::new(MemoryLog::new()),
        }
    }

    pub fn load_ids(&self) -> Result<HashSet<String>> {
        Ok(self.log.scan()?.map(|record| record.id).collect())
    }

    pub fn append(&self, id: &str) -> Result<()> {
        self.log.append(&HistoryRecord { id: id.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_ledger_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("history.jsonl");
        let ledger = HistoryLedger::open(&path);
        ledger.append("a").unwrap();
        ledger.append("b").unwrap();
        ledger.append("a").unwrap();

        let reopened = HistoryLedger::open(&path);
        let ids = reopened.load_ids().unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("a") && ids.contains("b"));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap().lines().next(),
            Some("{\"id\":\"a\"}")
        );
    }

    #[test]
    fn test_corrupt_line_does_not_hide_later_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("history.jsonl");
        let ledger = HistoryLedger::open(&path);
        ledger.append("a").unwrap();
        let mut raw = std::fs::read(&path).unwrap();
        raw.extend_from_slice(b"\xfe\n");
        std::fs::write(&path, raw).unwrap();
        ledger.append("rejected-forever").unwrap();

        let ids = ledger.load_ids().unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("rejected-forever"));
    }
}
