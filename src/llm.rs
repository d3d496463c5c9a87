//! AI enrichment of a job's simplified article.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::TARGET_LLM_REQUEST;

/// Turns the files in a job directory into enriched HTML, following
/// `instruction`. Each call gets its own `work_dir` with exclusive access.
#[async_trait]
pub trait EnrichmentEngine: Send + Sync {
    async fn enrich(&self, work_dir: &Path, instruction: &str) -> Result<String>;
}

/// Runs an external AI command inside the job directory with the instruction
/// on stdin and takes its stdout as the enriched HTML.
#[derive(Debug, Clone)]
pub struct CommandEnrichment {
    program: String,
    args: Vec<String>,
    root: PathBuf,
}

impl CommandEnrichment {
    /// `command` is the program followed by its arguments. `root` hosts the
    /// shared cache and state directories.
    pub fn new(command: &[String], root: impl Into<PathBuf>) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow!("enrichment command is empty"))?;
        Ok(CommandEnrichment {
            program: program.clone(),
            args: args.to_vec(),
            root: root.into(),
        })
    }
}

#[async_trait]
impl EnrichmentEngine for CommandEnrichment {
    async fn enrich(&self, work_dir: &Path, instruction: &str) -> Result<String> {
        let local_home = work_dir.join(".codex_home");
        let local_cache = self.root.join(".cache");
        let local_state = self.root.join(".local").join("state");
        for dir in [&local_home, &local_cache, &local_state] {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(work_dir)
            .env("HOME", &local_home)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if std::env::var_os("XDG_CACHE_HOME").is_none() {
            command.env("XDG_CACHE_HOME", &local_cache);
        }
        if std::env::var_os("XDG_STATE_HOME").is_none() {
            command.env("XDG_STATE_HOME", &local_state);
        }

        debug!(target: TARGET_LLM_REQUEST, "Running {} in {}", self.program, work_dir.display());
        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to start {}", self.program))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(instruction.as_bytes())
                .await
                .with_context(|| format!("Failed to send instruction to {}", self.program))?;
        }

        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("Failed to wait for {}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            bail!("{} exit {}: {}", self.program, code, stderr.trim());
        }

        let html = String::from_utf8_lossy(&output.stdout).into_owned();
        if html.trim().is_empty() {
            bail!("{} returned empty content", self.program);
        }

        let out_path = work_dir.join("output.html");
        tokio::fs::write(&out_path, &html)
            .await
            .with_context(|| format!("Failed to write {}", out_path.display()))?;
        info!(target: TARGET_LLM_REQUEST, "Enriched {} ({} bytes)", work_dir.display(), html.len());
        Ok(html)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str, root: &Path) -> CommandEnrichment {
        let command = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
        CommandEnrichment::new(&command, root).unwrap()
    }

    #[test]
    fn test_empty_command_is_rejected() {
        assert!(CommandEnrichment::new(&[], "/tmp").is_err());
    }

    #[tokio::test]
    async fn test_enrich_runs_in_job_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let job = tmp.path().join("job_0");
        std::fs::create_dir_all(&job).unwrap();
        let engine = sh(
            r#"cat > seen_prompt.txt; printf '<p>%s</p>' "$(basename "$HOME")""#,
            tmp.path(),
        );

        let html = engine.enrich(&job, "Summarize content.html").await.unwrap();
        assert_eq!(html, "<p>.codex_home</p>");
        assert_eq!(
            std::fs::read_to_string(job.join("seen_prompt.txt")).unwrap(),
            "Summarize content.html"
        );
        assert_eq!(std::fs::read_to_string(job.join("output.html")).unwrap(), html);
    }

    #[tokio::test]
    async fn test_enrich_failures() {
        let tmp = tempfile::tempdir().unwrap();

        let failing = sh("cat >/dev/null; echo boom >&2; exit 3", tmp.path());
        let err = failing.enrich(tmp.path(), "x").await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("exit 3"), "{message}");
        assert!(message.contains("boom"), "{message}");

        let silent = sh("cat >/dev/null", tmp.path());
        let err = silent.enrich(tmp.path(), "x").await.unwrap_err();
        assert!(err.to_string().contains("empty content"));
        assert!(!tmp.path().join("output.html").exists());
    }
}
