//! Runtime configuration read from the process environment (and `.env`).

use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

use crate::TARGET_PIPELINE;

/// How the digest step delivers buffered entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// One email containing every selected entry.
    Digest,
    /// One email per entry, sent concurrently.
    Individual,
}

impl FromStr for SendMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "digest" | "" => Ok(SendMode::Digest),
            "individual" => Ok(SendMode::Individual),
            other => Err(anyhow!("unknown SEND_MODE '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub feed_download_workers: usize,
    pub process_workers: usize,
    pub send_workers: usize,
    pub max_posts_per_day: usize,
    pub include_ai_content: bool,
    pub auto_send_digest: bool,
    pub send_mode: SendMode,
    pub clear_buffer_after_send: bool,
    pub fail_ttl_seconds: i64,
    pub profile_name: Option<String>,
    pub enrich_command: Vec<String>,

    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_pass: Option<String>,
    pub smtp_from: Option<String>,
    pub smtp_to: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            feed_download_workers: 4,
            process_workers: 2,
            send_workers: 3,
            max_posts_per_day: 10,
            include_ai_content: true,
            auto_send_digest: false,
            send_mode: SendMode::Digest,
            clear_buffer_after_send: true,
            fail_ttl_seconds: 24 * 3600,
            profile_name: None,
            enrich_command: vec![
                "codex".to_string(),
                "exec".to_string(),
                "--skip-git-repo-check".to_string(),
            ],
            smtp_host: "smtp.gmail.com".to_string(),
            smtp_port: 587,
            smtp_user: None,
            smtp_pass: None,
            smtp_from: None,
            smtp_to: None,
        }
    }
}

impl Config {
    /// Loads `<root>/.env` (if present) and then reads every setting from the
    /// environment, keeping defaults for unset variables.
    pub fn load(root: &Path) -> Result<Config> {
        let env_path = root.join(".env");
        if env_path.exists() {
            dotenvy::from_path(&env_path)
                .with_context(|| format!("Failed to load {}", env_path.display()))?;
            debug!(target: TARGET_PIPELINE, "Loaded environment from {}", env_path.display());
        }
        Config::from_env()
    }

    pub fn from_env() -> Result<Config> {
        let mut cfg = Config::default();

        cfg.feed_download_workers = get_env_parsed("FEED_DOWNLOAD_WORKERS", cfg.feed_download_workers)?;
        cfg.process_workers = get_env_parsed("PROCESS_WORKERS", cfg.process_workers)?;
        cfg.send_workers = get_env_parsed("SEND_WORKERS", cfg.send_workers)?;
        cfg.max_posts_per_day = get_env_parsed("MAX_POSTS_PER_DAY", cfg.max_posts_per_day)?;
        cfg.include_ai_content = get_env_bool("INCLUDE_AI_CONTENT", cfg.include_ai_content);
        cfg.auto_send_digest = get_env_bool("AUTO_SEND_DIGEST", cfg.auto_send_digest);
        if let Some(mode) = get_env_string("SEND_MODE") {
            cfg.send_mode = mode.parse()?;
        }
        cfg.clear_buffer_after_send =
            get_env_bool("CLEAR_BUFFER_AFTER_SEND", cfg.clear_buffer_after_send);
        cfg.fail_ttl_seconds = get_env_parsed("FAIL_TTL_SECONDS", cfg.fail_ttl_seconds)?;
        cfg.profile_name = get_env_string("PROFILE_NAME");

        let command = get_env_var_as_vec("ENRICH_COMMAND", ' ');
        if !command.is_empty() {
            cfg.enrich_command = command;
        }

        if let Some(host) = get_env_string("SMTP_HOST") {
            cfg.smtp_host = host;
        }
        cfg.smtp_port = get_env_parsed("SMTP_PORT", cfg.smtp_port)?;
        cfg.smtp_user = get_env_string("SMTP_USER");
        cfg.smtp_pass = get_env_string("SMTP_PASS");
        cfg.smtp_from = get_env_string("SMTP_FROM");
        cfg.smtp_to = get_env_string("SMTP_TO");

        Ok(cfg)
    }
}

/// Retrieves an environment variable and splits it into a vector of strings based on a delimiter.
///
/// Empty segments are dropped, so an unset variable yields an empty vector.
pub fn get_env_var_as_vec(var: &str, delimiter: char) -> Vec<String> {
    env::var(var)
        .unwrap_or_default()
        .split(delimiter)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Returns the trimmed value of `var`, treating empty values as unset.
pub fn get_env_string(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn get_env_bool(var: &str, default: bool) -> bool {
    match env::var(var) {
        Ok(value) => parse_bool(&value),
        Err(_) => default,
    }
}

pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

fn get_env_parsed<T>(var: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get_env_string(var) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow!("Invalid value '{}' for {}: {}", raw, var, e)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "MAX_POSTS_PER_DAY",
        "SEND_MODE",
        "INCLUDE_AI_CONTENT",
        "ENRICH_COMMAND",
        "SMTP_FROM",
    ];

    fn clear() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_parse_bool() {
        for yes in ["1", "true", "YES", " y ", "On"] {
            assert!(parse_bool(yes), "{yes}");
        }
        for no in ["0", "false", "nope", ""] {
            assert!(!parse_bool(no), "{no}");
        }
    }

    #[test]
    #[serial]
    fn test_defaults_when_unset() {
        clear();
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.max_posts_per_day, 10);
        assert_eq!(cfg.send_mode, SendMode::Digest);
        assert!(cfg.include_ai_content);
        assert_eq!(cfg.enrich_command[0], "codex");
        assert!(cfg.smtp_from.is_none());
    }

    #[test]
    #[serial]
    fn test_overrides_from_env() {
        clear();
        env::set_var("MAX_POSTS_PER_DAY", "3");
        env::set_var("SEND_MODE", "Individual");
        env::set_var("INCLUDE_AI_CONTENT", "off");
        env::set_var("ENRICH_COMMAND", "my-ai  run --fast");
        env::set_var("SMTP_FROM", "  ");
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.max_posts_per_day, 3);
        assert_eq!(cfg.send_mode, SendMode::Individual);
        assert!(!cfg.include_ai_content);
        assert_eq!(cfg.enrich_command, vec!["my-ai", "run", "--fast"]);
        assert!(cfg.smtp_from.is_none());
        clear();
    }

    #[test]
    #[serial]
    fn test_invalid_number_is_an_error() {
        clear();
        env::set_var("MAX_POSTS_PER_DAY", "ten");
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("MAX_POSTS_PER_DAY"));
        clear();
    }
}
