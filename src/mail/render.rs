use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::Path;

use crate::content::escape_html;
use crate::store::BufferEntry;

pub const DIGEST_SOURCE_LABEL: &str = "Daily Digest";
pub const EMPTY_DIGEST_SUMMARY: &str = "No entries in today's digest.";

pub fn load_template(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(anyhow!("Template file missing: {}", path.display()));
    }
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Fills the `{{title}}`, `{{time}}`, `{{source}}`, `{{url}}`, `{{summary}}`
/// and `{{content_html}}` placeholders of `template` for `items`.
///
/// With `include_ai_content` off, each item shows its feed summary instead of
/// the buffered HTML.
pub fn build_mail_html(
    template: &str,
    items: &[BufferEntry],
    title: &str,
    time_label: &str,
    include_ai_content: bool,
) -> String {
    let summary = if items.is_empty() {
        EMPTY_DIGEST_SUMMARY.to_string()
    } else {
        items
            .iter()
            .enumerate()
            .map(|(idx, item)| {
                format!(
                    "{}. [{}] {}",
                    idx + 1,
                    escape_html(item.source_key()),
                    escape_html(item_title(item))
                )
            })
            .collect::<Vec<_>>()
            .join("<br>")
    };

    let blocks: Vec<String> = items
        .iter()
        .map(|item| item_block(item, include_ai_content))
        .collect();

    let url = items
        .first()
        .map(|item| item.url.as_str())
        .filter(|url| !url.is_empty())
        .unwrap_or("#");

    template
        .replace("{{title}}", &escape_html(title))
        .replace("{{time}}", &escape_html(time_label))
        .replace("{{source}}", DIGEST_SOURCE_LABEL)
        .replace("{{url}}", &escape_html(url))
        .replace("{{summary}}", &summary)
        .replace("{{content_html}}", &blocks.join("\n"))
}

fn item_title(item: &BufferEntry) -> &str {
    if item.title.is_empty() {
        "No title"
    } else {
        &item.title
    }
}

fn item_block(item: &BufferEntry, include_ai_content: bool) -> String {
    let content_html = if include_ai_content {
        item.content_html.clone()
    } else if item.summary.is_empty() {
        // already the summary fallback when enrichment was off
        item.content_html.clone()
    } else {
        format!("<p>{}</p>", item.summary)
    };
    let url = escape_html(&item.url);

    format!(
        r#"
        <div style="margin-bottom:24px; padding-bottom:16px; border-bottom:1px solid #e5e7eb;">
          <h2 style="font-size:18px; margin:0 0 6px 0;">{title}</h2>
          <div style="font-size:12px; color:#6b7280; margin-bottom:8px;">
            <span>{source}</span> &bull; <span>{published}</span> &bull; <span>score: {score:.1}</span>
          </div>
          <div style="font-size:14px; color:#111827; margin-bottom:10px;">
            {content_html}
          </div>
          <div style="font-size:13px;"><a href="{url}" target="_blank" rel="noopener noreferrer">{url}</a></div>
        </div>
        "#,
        title = escape_html(item_title(item)),
        source = escape_html(item.source_key()),
        published = escape_html(&item.published),
        score = item.score,
        content_html = content_html,
        url = url,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = "<h1>{{title}}</h1><p>{{time}}</p><p>{{source}}</p><a href=\"{{url}}\">x</a><div>{{summary}}</div><main>{{content_html}}</main>";

    fn item(id: &str, title: &str, score: f64) -> BufferEntry {
        BufferEntry {
            id: id.to_string(),
            source: "Tech Blog".to_string(),
            title: title.to_string(),
            url: format!("https://tech.example.com/{id}"),
            published: "2024-05-02T08:00:00+00:00".to_string(),
            summary: format!("summary of {id}"),
            content_html: format!("<p>ai {id}</p>"),
            score,
            ..Default::default()
        }
    }

    #[test]
    fn test_digest_placeholders() {
        let items = vec![item("a", "Rust & you", 4.25), item("b", "", 1.0)];
        let html = build_mail_html(TEMPLATE, &items, "Daily RSS Digest (2024-05-02)", "17:00 UTC", true);

        assert!(html.contains("<h1>Daily RSS Digest (2024-05-02)</h1>"));
        assert!(html.contains("<p>17:00 UTC</p>"));
        assert!(html.contains("<p>Daily Digest</p>"));
        assert!(html.contains("href=\"https://tech.example.com/a\""));
        assert!(html.contains("1. [Tech Blog] Rust &amp; you<br>2. [Tech Blog] No title"));
        assert!(html.contains("score: 4.2") || html.contains("score: 4.3"));
        assert!(html.contains("<p>ai a</p>"));
        assert!(!html.contains("{{"));
    }

    #[test]
    fn test_summary_instead_of_ai_content() {
        let html = build_mail_html(TEMPLATE, &[item("a", "A", 1.0)], "t", "now", false);
        assert!(html.contains("<p>summary of a</p>"));
        assert!(!html.contains("<p>ai a</p>"));
    }

    #[test]
    fn test_empty_digest() {
        let html = build_mail_html(TEMPLATE, &[], "t", "now", true);
        assert!(html.contains(EMPTY_DIGEST_SUMMARY));
        assert!(html.contains("href=\"#\""));
        assert!(html.contains("<main></main>"));
    }

    #[test]
    fn test_load_template_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let err = load_template(&tmp.path().join("email_template.html")).unwrap_err();
        assert!(err.to_string().contains("Template file missing"));
    }
}
