use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use dealwire_common::RawItem;
use regex::Regex;
use reqwest::StatusCode;
use tracing::info;

use super::Collector;
use crate::executor::CallError;

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("Invalid tag regex"));
static WS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("Invalid whitespace regex"));

/// Drop markup and collapse whitespace. Feed summaries are often HTML.
pub fn strip_html(html: &str) -> String {
    let text = TAG_RE.replace_all(html, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">");
    WS_RE.replace_all(&text, " ").trim().to_string()
}

/// RSS/Atom/JSON feed collector using reqwest + feed-rs.
pub struct RssCollector {
    name: String,
    url: String,
    max_items: usize,
    client: reqwest::Client,
}

impl RssCollector {
    pub fn new(name: impl Into<String>, url: impl Into<String>, max_items: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build RSS HTTP client")?;
        Ok(Self {
            name: name.into(),
            url: url.into(),
            max_items,
            client,
        })
    }

    fn parse(&self, bytes: &[u8]) -> Result<Vec<RawItem>> {
        let feed = feed_rs::parser::parse(bytes).context("Failed to parse RSS/Atom feed")?;

        let mut items: Vec<RawItem> = feed
            .entries
            .into_iter()
            .filter_map(|entry| {
                let url = entry
                    .links
                    .first()
                    .map(|l| l.href.clone())
                    .or_else(|| entry.id.starts_with("http").then(|| entry.id.clone()))?;
                let title = entry.title.map(|t| strip_html(&t.content)).unwrap_or_default();
                let summary = entry
                    .summary
                    .map(|s| strip_html(&s.content))
                    .unwrap_or_default();
                let published = entry
                    .published
                    .or(entry.updated)
                    .map(|dt| dt.with_timezone(&chrono::Utc));
                let full_text = entry
                    .content
                    .and_then(|c| c.body)
                    .map(|body| strip_html(&body))
                    .filter(|body| !body.is_empty());

                let mut item = RawItem::new("rss", &self.name, url, title, summary, published);
                item.full_text = full_text;
                Some(item)
            })
            .collect();

        // Newest first; undated last.
        items.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        items.truncate(self.max_items);
        Ok(items)
    }
}

#[async_trait]
impl Collector for RssCollector {
    fn name(&self) -> &str {
        &self.name
    }

    fn provider(&self) -> &str {
        "rss"
    }

    async fn collect(&self) -> Result<Vec<RawItem>, CallError> {
        let resp = self
            .client
            .get(&self.url)
            .header("User-Agent", "dealwire/0.1")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CallError::TimedOut
                } else {
                    CallError::Failed(format!("feed fetch failed: {e}"))
                }
            })?;

        if resp.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(CallError::Throttled { retry_after: None });
        }
        if !resp.status().is_success() {
            return Err(CallError::Failed(format!("feed returned {}", resp.status())));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| CallError::Failed(format!("failed to read feed body: {e}")))?;
        let items = self
            .parse(&bytes)
            .map_err(|e| CallError::Invalid(format!("{e:#}")))?;

        info!(feed = self.name.as_str(), items = items.len(), "Parsed RSS/Atom feed");
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Wire</title>
<item><title>Acme acquires Beta</title><link>https://wire.com/acme-beta?utm_source=rss</link>
<description>&lt;p&gt;Acme &amp;amp; Beta agree&lt;/p&gt;</description>
<pubDate>Tue, 10 Mar 2026 09:00:00 GMT</pubDate></item>
<item><title>Undated note</title><link>https://wire.com/note</link><description>plain</description></item>
<item><title>Older</title><link>https://wire.com/older</link><pubDate>Mon, 02 Mar 2026 09:00:00 GMT</pubDate></item>
</channel></rss>"#;

    #[test]
    fn strip_html_removes_tags_and_entities() {
        assert_eq!(strip_html("<p>Acme &amp; Beta</p>\n<b>agree</b>"), "Acme & Beta agree");
    }

    #[test]
    fn parses_entries_newest_first_and_truncates() {
        let collector = RssCollector::new("Wire", "https://wire.com/rss", 2).unwrap();
        let items = collector.parse(FEED.as_bytes()).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Acme acquires Beta");
        assert_eq!(items[0].summary, "Acme & Beta agree");
        assert_eq!(items[0].source_name, "Wire");
        assert_eq!(items[0].provider, "rss");
        assert_eq!(items[1].title, "Older");
    }

    #[test]
    fn garbage_is_an_error() {
        let collector = RssCollector::new("Wire", "https://wire.com/rss", 5).unwrap();
        assert!(collector.parse(b"not a feed").is_err());
    }
}
