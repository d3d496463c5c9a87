//! Utility functions for feed and page bodies.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::io::Read;
use tracing::debug;

use crate::TARGET_WEB_REQUEST;

/// Helper function to validate a URL
pub fn is_valid_url(url: &str) -> bool {
    if let Ok(parsed) = url::Url::parse(url) {
        parsed.scheme() == "http" || parsed.scheme() == "https"
    } else {
        false
    }
}

/// Parse a date string in various formats. Timestamps without an offset are
/// taken as UTC.
pub fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    let date_str = date_str.trim();

    // Try RFC3339
    if let Ok(date) = DateTime::parse_from_rfc3339(date_str) {
        return Some(date.with_timezone(&Utc));
    }

    // Try RFC2822
    if let Ok(date) = DateTime::parse_from_rfc2822(date_str) {
        return Some(date.with_timezone(&Utc));
    }

    // Try ISO 8601 with a compact offset
    if let Ok(date) = DateTime::parse_from_str(date_str, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(date.with_timezone(&Utc));
    }

    // Naive ISO 8601
    for format in &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(date) = NaiveDateTime::parse_from_str(date_str, format) {
            return Some(date.and_utc());
        }
    }

    None
}

/// Clean up malformed XML
pub fn cleanup_xml(xml: &str) -> String {
    let mut cleaned = xml.trim().to_string();

    // Remove any UTF-8 BOM if present
    if let Some(stripped) = cleaned.strip_prefix('\u{FEFF}') {
        cleaned = stripped.to_string();
    }

    // Remove any leading garbage before <?xml, <rss or <feed
    if let Some(xml_start) = cleaned.find("<?xml") {
        cleaned = cleaned[xml_start..].to_string();
    } else if let Some(rss_start) = cleaned.find("<rss") {
        cleaned = cleaned[rss_start..].to_string();
    } else if let Some(feed_start) = cleaned.find("<feed") {
        cleaned = cleaned[feed_start..].to_string();
    }

    // Replace common problematic entities
    cleaned = cleaned
        .replace("&nbsp;", "&#160;")
        .replace("&ndash;", "&#8211;")
        .replace("&mdash;", "&#8212;")
        .replace("&rsquo;", "&#8217;")
        .replace("&lsquo;", "&#8216;")
        .replace("&rdquo;", "&#8221;")
        .replace("&ldquo;", "&#8220;")
        .replace("&amp;amp;", "&amp;")
        .replace("&apos;", "&#39;");

    // Remove any invalid XML characters
    cleaned = cleaned
        .chars()
        .filter(|&c| {
            matches!(c,
                '\u{0009}' | // tab
                '\u{000A}' | // newline
                '\u{000D}' | // carriage return
                '\u{0020}'..='\u{D7FF}' |
                '\u{E000}'..='\u{FFFD}' |
                '\u{10000}'..='\u{10FFFF}'
            )
        })
        .collect();

    // Ensure proper XML declaration if missing
    if !cleaned.starts_with("<?xml") {
        cleaned = format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}", cleaned);
    }

    cleaned
}

/// Try various decompression methods for a byte array
pub fn try_decompressions(bytes: &[u8], url: &str) -> Vec<u8> {
    // First try gzip
    let mut decoder = flate2::read::GzDecoder::new(bytes);
    let mut decoded = Vec::new();
    if decoder.read_to_end(&mut decoded).is_ok() && !decoded.is_empty() {
        debug!(target: TARGET_WEB_REQUEST, "Successfully decompressed with gzip from {}", url);
        return decoded;
    }

    // Try zlib
    let mut decoder = flate2::read::ZlibDecoder::new(bytes);
    let mut decoded = Vec::new();
    if decoder.read_to_end(&mut decoded).is_ok() && !decoded.is_empty() {
        debug!(target: TARGET_WEB_REQUEST, "Successfully decompressed with zlib from {}", url);
        return decoded;
    }

    // Try deflate
    let mut decoder = flate2::read::DeflateDecoder::new(bytes);
    let mut decoded = Vec::new();
    if decoder.read_to_end(&mut decoded).is_ok() && !decoded.is_empty() {
        debug!(target: TARGET_WEB_REQUEST, "Successfully decompressed with deflate from {}", url);
        return decoded;
    }

    // If no decompression worked, use original bytes
    debug!(target: TARGET_WEB_REQUEST, "No decompression method worked for {}, using original bytes", url);
    bytes.to_vec()
}

/// Turns a raw response body into text: undoes any compression reqwest left
/// in place and decodes the charset named in the content type.
pub fn decode_body(
    bytes: &[u8],
    content_encoding: Option<&str>,
    content_type: Option<&str>,
    url: &str,
) -> String {
    let decompressed = if content_encoding == Some("br") {
        let mut decoded = Vec::new();
        let mut reader = brotli::Decompressor::new(bytes, 4096);
        if reader.read_to_end(&mut decoded).is_ok() && !decoded.is_empty() {
            debug!(target: TARGET_WEB_REQUEST, "Successfully decompressed brotli content from {}", url);
            decoded
        } else {
            try_decompressions(bytes, url)
        }
    } else if looks_like_text(bytes) {
        bytes.to_vec()
    } else {
        try_decompressions(bytes, url)
    };

    match String::from_utf8(decompressed) {
        Ok(text) => text,
        Err(err) => {
            let raw = err.into_bytes();
            let charset = content_type.and_then(|ct| {
                ct.split(';')
                    .find(|part| part.trim().to_lowercase().starts_with("charset="))
                    .and_then(|part| part.split('=').nth(1))
                    .map(|c| c.trim().trim_matches('"').to_string())
            });
            let encoding = charset
                .as_deref()
                .and_then(|label| encoding_rs::Encoding::for_label(label.as_bytes()))
                .unwrap_or(encoding_rs::WINDOWS_1252);
            debug!(target: TARGET_WEB_REQUEST, "Decoding {} as {}", url, encoding.name());
            let (decoded, _, _) = encoding.decode(&raw);
            decoded.into_owned()
        }
    }
}

fn looks_like_text(bytes: &[u8]) -> bool {
    let trimmed = bytes
        .strip_prefix(b"\xEF\xBB\xBF".as_slice())
        .unwrap_or(bytes)
        .iter()
        .find(|b| !b.is_ascii_whitespace());
    matches!(trimmed, Some(b'<') | Some(b'{') | Some(b'['))
}
