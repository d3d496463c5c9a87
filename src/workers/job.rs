use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::rss::FeedEntry;
use crate::selector::Candidate;
use crate::TARGET_PIPELINE;

/// A job's private working directory, removed when dropped.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// Creates `path` empty, clearing anything a previous run left behind.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.exists() {
            fs::remove_dir_all(&path)
                .with_context(|| format!("Failed to clear stale {}", path.display()))?;
        }
        fs::create_dir_all(&path).with_context(|| format!("Failed to create {}", path.display()))?;
        Ok(ScratchDir { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(target: TARGET_PIPELINE, "Removed {}", self.path.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(target: TARGET_PIPELINE, "Failed to remove {}: {}", self.path.display(), err),
        }
    }
}

/// One selected entry with its own scratch directory.
#[derive(Debug)]
pub struct Job {
    pub dir: ScratchDir,
    pub entry: FeedEntry,
    pub score: f64,
    pub profile_name: String,
}

impl Job {
    /// Creates `<process_root>/job_<index>` holding only `article.json`.
    pub fn materialize(
        process_root: &Path,
        index: usize,
        entry: FeedEntry,
        score: f64,
        profile_name: &str,
    ) -> Result<Job> {
        let dir = ScratchDir::create(process_root.join(format!("job_{}", index)))?;
        let article = serde_json::to_string_pretty(&entry).context("Failed to encode article")?;
        let article_path = dir.path().join("article.json");
        fs::write(&article_path, article)
            .with_context(|| format!("Failed to write {}", article_path.display()))?;
        Ok(Job {
            dir,
            entry,
            score,
            profile_name: profile_name.to_string(),
        })
    }
}

pub fn materialize_jobs(
    process_root: &Path,
    selected: Vec<Candidate>,
    profile_name: &str,
) -> Result<Vec<Job>> {
    selected
        .into_iter()
        .enumerate()
        .map(|(index, candidate)| {
            Job::materialize(process_root, index, candidate.entry, candidate.score, profile_name)
        })
        .collect()
}
