//! Article retrieval and reduction for a single job.

mod fetcher;
mod simplify;

pub use self::fetcher::{find_amphtml, ContentFetcher, HttpContentFetcher};
pub use self::simplify::{escape_html, simplify_html, strip_styles_and_scripts};
