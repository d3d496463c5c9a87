//! Recently-failed domains, used to skip refetching hosts that are down or
//! blocking us until a TTL expires.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;

use crate::TARGET_WEB_REQUEST;

/// JSON object mapping domain to the unix time of its last failure. The file
/// is rewritten wholesale on every update; last writer wins.
pub struct FailCache {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FailCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FailCache {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Missing or unreadable caches are treated as empty.
    pub fn load(&self) -> HashMap<String, f64> {
        fs::read_to_string(&self.path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    pub fn is_blocked(&self, domain: &str, now: f64, ttl_seconds: i64) -> bool {
        match self.load().get(domain) {
            Some(failed_at) => now - failed_at < ttl_seconds as f64,
            None => false,
        }
    }

    pub fn remember(&self, domain: &str, now: f64) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut cache = self.load();
        cache.insert(domain.to_string(), now);
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let body = serde_json::to_string(&cache).context("Failed to encode fail cache")?;
        fs::write(&self.path, body)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        debug!(target: TARGET_WEB_REQUEST, "Remembered failing domain {}", domain);
        Ok(())
    }

    /// Deletes the cache file. Returns false when there was nothing to delete.
    pub fn purge(&self) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        fs::remove_file(&self.path)
            .with_context(|| format!("Failed to remove {}", self.path.display()))?;
        Ok(true)
    }
}

/// Host (plus explicit port) of a URL, the key used by the fail cache.
pub fn domain_of(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_of() {
        assert_eq!(domain_of("https://example.com/a?b=c").as_deref(), Some("example.com"));
        assert_eq!(domain_of("http://localhost:8080/x").as_deref(), Some("localhost:8080"));
        assert_eq!(domain_of("not a url"), None);
    }

    #[test]
    fn test_ttl_and_purge() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = FailCache::new(tmp.path().join("tmp/fetch_failures.json"));
        assert!(!cache.is_blocked("example.com", 1000.0, 60));
        assert!(!cache.purge().unwrap());

        cache.remember("example.com", 1000.0).unwrap();
        assert!(cache.is_blocked("example.com", 1059.0, 60));
        assert!(!cache.is_blocked("example.com", 1060.0, 60));
        assert!(!cache.is_blocked("other.org", 1001.0, 60));

        assert!(cache.purge().unwrap());
        assert!(!cache.is_blocked("example.com", 1001.0, 60));
    }

    #[test]
    fn test_corrupt_cache_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("fetch_failures.json");
        fs::write(&path, "{oops").unwrap();
        let cache = FailCache::new(&path);
        assert!(cache.load().is_empty());
        cache.remember("a.com", 5.0).unwrap();
        assert_eq!(cache.load().get("a.com"), Some(&5.0));
    }
}
