//! Feed parsing for RSS, Atom and JSON Feed documents.

use anyhow::{anyhow, Result};
use feed_rs::model::Entry;
use feed_rs::parser;
use std::io::Cursor;
use tracing::{debug, error};

use super::types::FeedEntry;
use super::util::cleanup_xml;
use crate::TARGET_WEB_REQUEST;

/// Parse a feed document and normalize every item for `source_name`.
pub fn parse_feed(text: &str, source_name: &str) -> Result<Vec<FeedEntry>> {
    match parser::parse(Cursor::new(text.as_bytes())) {
        Ok(feed) => Ok(feed
            .entries
            .into_iter()
            .map(|entry| normalize_entry(source_name, entry))
            .collect()),
        Err(first_err) => {
            // Try cleaning the XML first
            let cleaned_xml = cleanup_xml(text);

            if cleaned_xml.contains("<rss") || cleaned_xml.contains("<feed") {
                match parser::parse(Cursor::new(cleaned_xml.as_bytes())) {
                    Ok(feed) => {
                        debug!(target: TARGET_WEB_REQUEST, "Feed {} parsed after XML cleanup", source_name);
                        Ok(feed
                            .entries
                            .into_iter()
                            .map(|entry| normalize_entry(source_name, entry))
                            .collect())
                    }
                    Err(second_err) => {
                        error!(
                            target: TARGET_WEB_REQUEST,
                            "Failed to parse feed {} after cleanup. First error: {}. Second error: {}",
                            source_name,
                            first_err,
                            second_err
                        );
                        Err(anyhow!("XML parsing error even after cleanup"))
                    }
                }
            } else {
                let preview = if text
                    .chars()
                    .all(|c| c.is_ascii_graphic() || c.is_whitespace())
                {
                    text.chars().take(100).collect::<String>()
                } else {
                    "[binary data]".to_string()
                };
                Err(anyhow!(
                    "Feed {} doesn't appear to be RSS, Atom or JSON Feed. Content preview: {}",
                    source_name,
                    preview
                ))
            }
        }
    }
}

/// Map a parsed feed item onto a `FeedEntry`.
pub fn normalize_entry(source_name: &str, entry: Entry) -> FeedEntry {
    let title = entry.title.map(|t| t.content).unwrap_or_default();
    let url = entry
        .links
        .first()
        .map(|link| link.href.clone())
        .unwrap_or_default();
    let summary = entry.summary.map(|t| t.content).unwrap_or_default();
    let content = entry
        .content
        .and_then(|c| c.body)
        .filter(|body| !body.is_empty())
        .unwrap_or_else(|| summary.clone());
    let published = entry
        .published
        .or(entry.updated)
        .map(|d| d.to_rfc3339())
        .unwrap_or_default();

    let id = if !entry.id.trim().is_empty() {
        entry.id
    } else if !url.is_empty() {
        url.clone()
    } else {
        format!("{}-{}", source_name, title)
    };

    FeedEntry {
        id,
        source: source_name.to_string(),
        title,
        url,
        published,
        summary,
        content,
    }
}
