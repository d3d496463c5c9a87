use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;

use crate::rss::{create_http_client, REQUEST_TIMEOUT};
use crate::TARGET_WEB_REQUEST;

static LINK_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<link\b[^>]*>").expect("valid link regex"));
static REL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\brel\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#).expect("valid rel regex")
});
static HREF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bhref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#).expect("valid href regex")
});

/// Returns the raw markup behind a URL.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// Fetches article pages over HTTP, preferring the AMP variant when the page
/// advertises one.
pub struct HttpContentFetcher {
    client: reqwest::Client,
}

impl HttpContentFetcher {
    pub fn new() -> Result<Self> {
        Ok(HttpContentFetcher {
            client: create_http_client(true)?,
        })
    }

    async fn get(&self, url: &str) -> Result<String> {
        let request = self
            .client
            .get(url)
            .header(header::USER_AGENT, "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36")
            .header(header::ACCEPT, "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header(header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send();

        let response = timeout(REQUEST_TIMEOUT, request)
            .await
            .map_err(|_| {
                anyhow!(
                    "Request to {} timed out after {} seconds",
                    url,
                    REQUEST_TIMEOUT.as_secs()
                )
            })?
            .with_context(|| format!("Request to {} failed", url))?
            .error_for_status()
            .with_context(|| format!("HTTP error from {}", url))?;

        response
            .text()
            .await
            .with_context(|| format!("Failed to read body from {}", url))
    }
}

#[async_trait]
impl ContentFetcher for HttpContentFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        debug!(target: TARGET_WEB_REQUEST, "Fetching article {}", url);
        let html = self.get(url).await?;

        if let Some(amp_url) = find_amphtml(&html, url) {
            match self.get(&amp_url).await {
                Ok(amp_html) => {
                    info!(target: TARGET_WEB_REQUEST, "Using AMP variant {} for {}", amp_url, url);
                    return Ok(amp_html);
                }
                Err(err) => {
                    warn!(target: TARGET_WEB_REQUEST, "AMP variant {} failed, keeping original: {:#}", amp_url, err);
                }
            }
        }
        Ok(html)
    }
}

/// Finds `<link rel="amphtml" href="..">` and resolves the href against
/// `page_url`.
pub fn find_amphtml(html: &str, page_url: &str) -> Option<String> {
    let first_group = |caps: regex::Captures<'_>| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .or_else(|| caps.get(3))
            .map(|m| m.as_str().to_string())
    };

    for tag in LINK_TAG_RE.find_iter(html) {
        let tag = tag.as_str();
        let is_amp = REL_RE
            .captures(tag)
            .and_then(first_group)
            .map(|rel| {
                rel.split_whitespace()
                    .any(|token| token.eq_ignore_ascii_case("amphtml"))
            })
            .unwrap_or(false);
        if !is_amp {
            continue;
        }
        let href = HREF_RE.captures(tag).and_then(first_group)?;
        if href.trim().is_empty() {
            return None;
        }
        return match Url::parse(page_url) {
            Ok(base) => base.join(href.trim()).ok().map(|u| u.to_string()),
            Err(_) => Url::parse(href.trim()).ok().map(|u| u.to_string()),
        };
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_amphtml_relative_and_absolute() {
        let html = r#"<html><head>
            <link rel="stylesheet" href="/main.css">
            <link rel="amphtml" href="/amp/story-1">
        </head></html>"#;
        assert_eq!(
            find_amphtml(html, "https://news.example.com/story-1?ref=rss"),
            Some("https://news.example.com/amp/story-1".to_string())
        );

        let html = "<LINK href='https://amp.example.org/x' REL='amphtml'/>";
        assert_eq!(
            find_amphtml(html, "https://example.org/x"),
            Some("https://amp.example.org/x".to_string())
        );
    }

    #[test]
    fn test_find_amphtml_absent() {
        let html = r#"<link rel="canonical" href="https://example.com/a">"#;
        assert_eq!(find_amphtml(html, "https://example.com/a"), None);
        assert_eq!(find_amphtml("<p>no links</p>", "https://example.com/a"), None);
    }
}
