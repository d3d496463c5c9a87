//! Filesystem layout of a knowever project directory.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::environment::get_env_string;

#[derive(Debug, Clone)]
pub struct Paths {
    pub root: PathBuf,
    pub feeds_dir: PathBuf,
    pub process_root: PathBuf,
    pub tmp_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub daily_buffer: PathBuf,
    pub history_path: PathBuf,
    pub sources_file: PathBuf,
    pub profile_file: PathBuf,
    pub email_template: PathBuf,
    pub prompt_file: PathBuf,
    pub fail_cache: PathBuf,
    pub day_lock: PathBuf,
}

impl Paths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let tmp_dir = root.join("tmp");
        Paths {
            feeds_dir: root.join("feeds"),
            process_root: root.join("actual_process_feed"),
            logs_dir: root.join("logs"),
            daily_buffer: root.join("daily_buffer.jsonl"),
            history_path: root.join("feeds_process_history.jsonl"),
            sources_file: root.join("sources.yaml"),
            profile_file: root.join("profile.yaml"),
            email_template: root.join("email_template.html"),
            prompt_file: root.join("prompt.md"),
            fail_cache: tmp_dir.join("fetch_failures.json"),
            day_lock: root.join("day.lock"),
            tmp_dir,
            root,
        }
    }

    /// Project root from `KNOWEVER_ROOT`, or the current working directory.
    pub fn detect() -> Result<Self> {
        let root = match get_env_string("KNOWEVER_ROOT") {
            Some(dir) => PathBuf::from(dir),
            None => std::env::current_dir().context("Failed to resolve current directory")?,
        };
        Ok(Paths::new(root))
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.feeds_dir, &self.process_root, &self.tmp_dir, &self.logs_dir] {
            create_dir(dir)?;
        }
        Ok(())
    }
}

fn create_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))
}
