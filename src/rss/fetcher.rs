//! Feed retrieval and ingestion into the Feed Store.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::header;
use std::fs;
use std::path::Path;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::client::fetch_with_fallback;
use super::parser::parse_feed;
use super::types::{FeedEntry, Source, MAX_RETRIES, RETRY_DELAY};
use super::util::{decode_body, is_valid_url};
use crate::store::FeedStore;
use crate::TARGET_WEB_REQUEST;

/// Reads the ordered list of sources from `sources.yaml`.
pub fn load_sources(path: &Path) -> Result<Vec<Source>> {
    if !path.exists() {
        return Err(anyhow!("sources file not found: {}", path.display()));
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let value: serde_yaml::Value = serde_yaml::from_str(&raw)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    if value.is_null() {
        return Ok(Vec::new());
    }
    if !value.is_sequence() {
        return Err(anyhow!("sources.yaml must contain a list of sources"));
    }
    serde_yaml::from_value(value).with_context(|| format!("Invalid source in {}", path.display()))
}

/// Returns the normalized entries currently published by one source.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, source: &Source) -> Result<Vec<FeedEntry>>;
}

/// Fetches feeds over HTTP, retrying transient failures.
#[derive(Debug, Clone, Default)]
pub struct HttpFeedFetcher;

impl HttpFeedFetcher {
    async fn fetch_once(&self, source: &Source) -> Result<Vec<FeedEntry>> {
        let (response, browser_emulation_used) = fetch_with_fallback(&source.url).await?;
        if browser_emulation_used {
            info!(target: TARGET_WEB_REQUEST, "Browser emulation was required for {}", source.url);
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|ct| ct.to_str().ok())
            .map(|s| s.to_lowercase());
        let content_encoding = response
            .headers()
            .get(header::CONTENT_ENCODING)
            .and_then(|value| value.to_str().ok())
            .map(|s| s.to_lowercase());

        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read response bytes from {}", source.url))?;

        let body = decode_body(
            &bytes,
            content_encoding.as_deref(),
            content_type.as_deref(),
            &source.url,
        );
        parse_feed(&body, &source.name)
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, source: &Source) -> Result<Vec<FeedEntry>> {
        if !is_valid_url(&source.url) {
            return Err(anyhow!("invalid feed URL: {}", source.url));
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            debug!(target: TARGET_WEB_REQUEST, "Loading feed {} from {} (attempt {})", source.name, source.url, attempts);
            match self.fetch_once(source).await {
                Ok(entries) => return Ok(entries),
                Err(err) if attempts >= MAX_RETRIES => {
                    error!(target: TARGET_WEB_REQUEST, "Max retries reached for {}: {}", source.url, err);
                    return Err(err);
                }
                Err(err) => {
                    warn!(target: TARGET_WEB_REQUEST, "Fetching {} failed, retrying: {}", source.url, err);
                    sleep(RETRY_DELAY).await;
                }
            }
        }
    }
}

/// Outcome of one `download` run.
#[derive(Debug, Default)]
pub struct DownloadReport {
    pub sources_ok: usize,
    pub entries_added: usize,
    /// `(source name, error)` for every source that could not be ingested.
    pub failures: Vec<(String, String)>,
}

/// Fetches every source with at most `workers` in flight and appends the new
/// entries to each source's log. A failing source never stops the others.
pub async fn download_all(
    store: &FeedStore,
    sources: &[Source],
    fetcher: &dyn FeedFetcher,
    workers: usize,
) -> DownloadReport {
    let results: Vec<(String, Result<usize>)> = stream::iter(sources.iter())
        .map(|source| async move {
            let added = match fetcher.fetch(source).await {
                Ok(entries) => {
                    let log = store.log_for(&source.name);
                    FeedStore::append_entries(&log, &entries)
                }
                Err(err) => Err(err),
            };
            (source.name.clone(), added)
        })
        .buffer_unordered(workers.max(1))
        .collect()
        .await;

    let mut report = DownloadReport::default();
    for (name, result) in results {
        match result {
            Ok(added) => {
                info!(target: TARGET_WEB_REQUEST, "{}: added {} new entries", name, added);
                report.sources_ok += 1;
                report.entries_added += added;
            }
            Err(err) => {
                error!(target: TARGET_WEB_REQUEST, "Error while fetching {}: {:#}", name, err);
                report.failures.push((name, format!("{:#}", err)));
            }
        }
    }
    report
}
