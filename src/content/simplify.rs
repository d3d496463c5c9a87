use once_cell::sync::Lazy;
use regex::Regex;
use std::io::Cursor;
use tracing::debug;
use url::Url;

use readability::extractor;

use crate::TARGET_WEB_REQUEST;

static SCRIPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("valid script regex"));
static STYLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").expect("valid style regex"));
static STYLE_ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)\sstyle\s*=\s*(?:"[^"]*"|'[^']*')"#).expect("valid style attribute regex")
});

/// Removes `<script>` and `<style>` blocks and inline `style` attributes.
pub fn strip_styles_and_scripts(html: &str) -> String {
    let html = SCRIPT_RE.replace_all(html, "");
    let html = STYLE_RE.replace_all(&html, "");
    STYLE_ATTR_RE.replace_all(&html, "").into_owned()
}

/// Reduces a page to its main article, wrapped in a minimal UTF-8 document
/// headed by `title` when one is given.
pub fn simplify_html(html: &str, title: Option<&str>, page_url: &str) -> String {
    let cleaned = strip_styles_and_scripts(html);

    let base = Url::parse(page_url)
        .or_else(|_| Url::parse("http://localhost/"))
        .ok();
    let extracted = base.and_then(|base| {
        let mut reader = Cursor::new(cleaned.as_bytes());
        match extractor::extract(&mut reader, &base) {
            Ok(product) if !product.content.trim().is_empty() => Some(product.content),
            Ok(_) => None,
            Err(err) => {
                debug!(target: TARGET_WEB_REQUEST, "Readability failed for {}: {:?}", page_url, err);
                None
            }
        }
    });
    let main = extracted.unwrap_or(cleaned);

    let mut out = String::from("<html><head><meta charset='utf-8'></head><body>");
    if let Some(title) = title.filter(|t| !t.trim().is_empty()) {
        out.push_str("<h1>");
        out.push_str(&escape_html(title));
        out.push_str("</h1>");
    }
    out.push_str(&main);
    out.push_str("</body></html>");
    out
}

/// Escapes text for inclusion in HTML element content or attributes.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}
