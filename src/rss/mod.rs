//! RSS feed downloading for knowever.
//!
//! This module handles fetching, parsing and normalizing feeds into the
//! per-source Feed Store logs.

mod client;
mod fetcher;
mod parser;
mod types;
mod util;

pub use self::types::*;

pub use self::client::{create_http_client, fetch_with_fallback};
pub use self::fetcher::{download_all, load_sources, DownloadReport, FeedFetcher, HttpFeedFetcher};
pub use self::parser::{normalize_entry, parse_feed};
pub use self::util::{cleanup_xml, decode_body, is_valid_url, parse_date, try_decompressions};
