use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// Marker file holding the date of the last completed `run`.
#[derive(Debug, Clone)]
pub struct DayLock {
    path: PathBuf,
}

impl DayLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DayLock { path: path.into() }
    }

    /// An unreadable lock file counts as "not run yet".
    pub fn already_ran(&self, today: &str) -> bool {
        fs::read_to_string(&self.path)
            .map(|content| content.trim() == today)
            .unwrap_or(false)
    }

    pub fn mark(&self, today: &str) -> Result<()> {
        fs::write(&self.path, format!("{}\n", today))
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}
