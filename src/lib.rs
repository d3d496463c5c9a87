pub mod content;
pub mod digest;
pub mod environment;
pub mod llm;
pub mod logging;
pub mod mail;
pub mod paths;
pub mod pipeline;
pub mod profile;
pub mod rss;
pub mod scoring;
pub mod selector;
pub mod store;
pub mod workers;

pub use environment::{Config, SendMode};
pub use paths::Paths;
pub use profile::ScoringProfile;
pub use rss::FeedEntry;

pub const TARGET_WEB_REQUEST: &str = "web_request";
pub const TARGET_LLM_REQUEST: &str = "llm_request";
pub const TARGET_PIPELINE: &str = "pipeline";

/// Calendar day used to tag and select Daily Buffer entries (UTC).
pub fn utc_day(now: chrono::DateTime<chrono::Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}
