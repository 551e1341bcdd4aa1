// Query-style collection through Serper's Google News endpoint.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dealwire_common::RawItem;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::info;

use super::{strip_html, Collector};
use crate::executor::CallError;

const SERPER_NEWS_URL: &str = "https://google.serper.dev/news";

#[derive(Debug, Deserialize)]
struct SerperNewsResponse {
    #[serde(default)]
    news: Vec<SerperNewsResult>,
}

#[derive(Debug, Deserialize)]
struct SerperNewsResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    source: Option<String>,
}

pub struct SerperNewsCollector {
    query: String,
    api_key: String,
    max_results: usize,
    client: reqwest::Client,
    endpoint: String,
}

impl SerperNewsCollector {
    pub fn new(api_key: &str, query: impl Into<String>, max_results: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build Serper HTTP client")?;
        Ok(Self {
            query: query.into(),
            api_key: api_key.to_string(),
            max_results,
            client,
            endpoint: SERPER_NEWS_URL.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn into_items(&self, response: SerperNewsResponse, now: DateTime<Utc>) -> Vec<RawItem> {
        response
            .news
            .into_iter()
            .filter(|r| !r.link.is_empty())
            .take(self.max_results)
            .map(|r| {
                let source_name = r
                    .source
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| format!("search: {}", self.query));
                let published = r.date.as_deref().and_then(|d| parse_news_date(d, now));
                RawItem::new(
                    "serper",
                    source_name,
                    r.link,
                    strip_html(&r.title),
                    strip_html(&r.snippet),
                    published,
                )
            })
            .collect()
    }
}

/// Serper reports dates either relative ("3 hours ago") or as "Mar 10, 2026".
fn parse_news_date(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Some(rest) = text.strip_suffix(" ago") {
        let mut parts = rest.split_whitespace();
        let amount: i64 = parts.next()?.parse().ok()?;
        let unit = parts.next()?.trim_end_matches('s');
        let delta = match unit {
            "minute" | "min" => chrono::Duration::minutes(amount),
            "hour" => chrono::Duration::hours(amount),
            "day" => chrono::Duration::days(amount),
            "week" => chrono::Duration::weeks(amount),
            "month" => chrono::Duration::days(30 * amount),
            _ => return None,
        };
        return Some(now - delta);
    }

    ["%b %d, %Y", "%d %b %Y", "%Y-%m-%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

#[async_trait]
impl Collector for SerperNewsCollector {
    fn name(&self) -> &str {
        &self.query
    }

    fn provider(&self) -> &str {
        "serper"
    }

    async fn collect(&self) -> Result<Vec<RawItem>, CallError> {
        info!(query = self.query.as_str(), max_results = self.max_results, "search: querying serper news");

        let body = serde_json::json!({
            "q": self.query,
            "num": self.max_results,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CallError::TimedOut
                } else {
                    CallError::Failed(format!("Serper API request failed: {e}"))
                }
            })?;

        if resp.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(CallError::Throttled { retry_after: None });
        }
        if !resp.status().is_success() {
            return Err(CallError::Failed(format!("Serper returned {}", resp.status())));
        }

        let data: SerperNewsResponse = resp
            .json()
            .await
            .map_err(|e| CallError::Invalid(format!("Failed to parse Serper response: {e}")))?;

        let items = self.into_items(data, Utc::now());
        info!(query = self.query.as_str(), count = items.len(), "search: complete");
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn relative_and_absolute_dates_parse() {
        assert_eq!(
            parse_news_date("3 hours ago", now()),
            Some(Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap())
        );
        assert_eq!(
            parse_news_date("1 day ago", now()),
            Some(Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap())
        );
        assert_eq!(
            parse_news_date("Mar 2, 2026", now()),
            Some(Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_news_date("sometime", now()), None);
    }

    #[test]
    fn results_become_raw_items() {
        let collector = SerperNewsCollector::new("k", "acme acquisition", 2).unwrap();
        let response: SerperNewsResponse = serde_json::from_value(serde_json::json!({
            "news": [
                {"title": "Acme buys Beta", "link": "https://news.com/a", "snippet": "Deal <b>done</b>", "date": "2 hours ago", "source": "News Co"},
                {"title": "No link", "link": ""},
                {"title": "Second", "link": "https://news.com/b", "snippet": "x"},
                {"title": "Third", "link": "https://news.com/c", "snippet": "y"}
            ]
        }))
        .unwrap();

        let items = collector.into_items(response, now());
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].source_name, "News Co");
        assert_eq!(items[0].summary, "Deal done");
        assert_eq!(items[0].provider, "serper");
        assert!(items[0].published_at.is_some());
        assert_eq!(items[1].source_name, "search: acme acquisition");
        assert_eq!(items[1].published_at, None);
    }
}
