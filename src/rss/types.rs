//! Type definitions for the RSS module.

use serde::{Deserialize, Serialize};
use tokio::time::Duration;

/// One feed item normalized into the common record stored in the Feed Store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedEntry {
    /// Stable dedup key: feed id/guid, else link, else `"<source>-<title>"`.
    pub id: String,
    /// Logical feed name from `sources.yaml`.
    pub source: String,
    pub title: String,
    pub url: String,
    /// RFC 3339 timestamp, or empty when the feed gave none.
    pub published: String,
    pub summary: String,
    /// Raw text/HTML body from the feed.
    pub content: String,
}

impl FeedEntry {
    /// Source name used for quota accounting; unnamed sources share `"?"`.
    pub fn source_key(&self) -> &str {
        if self.source.is_empty() {
            "?"
        } else {
            &self.source
        }
    }
}

/// A configured feed, as listed in `sources.yaml`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Source {
    pub name: String,
    pub url: String,
}

// Constants
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const RETRY_DELAY: Duration = Duration::from_secs(5);
pub const MAX_RETRIES: usize = 3;
