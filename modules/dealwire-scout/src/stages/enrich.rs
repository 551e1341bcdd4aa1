use std::cmp::Reverse;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use dealwire_common::{
    is_trusted_domain, ClassifiedItem, EnrichSettings, EnrichedItem, FetchOutcome, ItemError,
};
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use spider_transformations::transformation::content::{
    transform_content_input, ReturnFormat, TransformConfig, TransformInput,
};
use tracing::{info, warn};

use super::item_error;
use crate::executor::{CallError, Executor, TaskError};

/// Fetches the readable body text of an article URL.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, CallError>;
}

/// reqwest + Readability extraction.
pub struct HttpDocumentFetcher {
    client: reqwest::Client,
}

impl HttpDocumentFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("Failed to build document HTTP client")?;
        Ok(Self { client })
    }
}

fn is_text_content(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime.starts_with("text/") || mime == "application/xhtml+xml"
}

fn html_to_text(html: &[u8], url: &str) -> String {
    let parsed_url = url::Url::parse(url).ok();
    let config = TransformConfig {
        readability: true,
        main_content: true,
        return_format: ReturnFormat::Markdown,
        filter_images: true,
        filter_svg: true,
        clean_html: true,
    };
    let input = TransformInput {
        url: parsed_url.as_ref(),
        content: html,
        screenshot_bytes: None,
        encoding: None,
        selector_config: None,
        ignore_tags: None,
    };
    transform_content_input(input, &config)
}

#[async_trait]
impl DocumentFetcher for HttpDocumentFetcher {
    async fn fetch(&self, url: &str) -> Result<String, CallError> {
        let resp = self
            .client
            .get(url)
            .header("User-Agent", "Mozilla/5.0 (compatible; dealwire/0.1)")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CallError::TimedOut
                } else {
                    CallError::Failed(format!("fetch failed: {e}"))
                }
            })?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(CallError::Throttled { retry_after });
        }
        if !status.is_success() {
            return Err(CallError::Failed(format!("HTTP {status}")));
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_string();
        if !is_text_content(&content_type) {
            return Err(CallError::Invalid(format!("non-text content: {content_type}")));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| CallError::Failed(format!("failed to read body: {e}")))?;

        if content_type.starts_with("text/plain") {
            return Ok(String::from_utf8_lossy(&body).into_owned());
        }
        Ok(html_to_text(&body, url))
    }
}

/// Order in which survivors compete for the fetch budget: trusted domains,
/// then relevance, then confidence, then input order.
fn fetch_priority(survivors: &[ClassifiedItem], trusted_domains: &[String]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..survivors.len()).collect();
    order.sort_by_key(|&i| {
        let item = &survivors[i];
        (
            !is_trusted_domain(&item.item.source_url, trusted_domains),
            item.relevance_level.rank(),
            Reverse(item.confidence),
            i,
        )
    });
    order
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Fetch full text for the top `max_items` survivors. The output is
/// index-aligned with `survivors`; an item whose fetch fails keeps its
/// summary and any body text the collector already had.
pub async fn enrich(
    executor: &Executor,
    fetcher: &dyn DocumentFetcher,
    survivors: Vec<ClassifiedItem>,
    settings: &EnrichSettings,
    trusted_domains: &[String],
) -> Vec<EnrichedItem> {
    let mut selected = fetch_priority(&survivors, trusted_domains);
    selected.truncate(settings.max_items);

    let pending = &survivors;
    let results = executor
        .run_all(selected.clone(), move |index| {
            let url = pending[index].item.source_url.as_str();
            async move { fetcher.fetch(url).await }
        })
        .await;

    let mut outcomes: Vec<Option<Result<String, TaskError>>> =
        (0..survivors.len()).map(|_| None).collect();
    for (index, result) in selected.into_iter().zip(results) {
        outcomes[index] = Some(result);
    }

    let (mut fetched, mut failed) = (0usize, 0usize);
    let enriched: Vec<EnrichedItem> = survivors
        .into_iter()
        .zip(outcomes)
        .map(|(item, outcome)| {
            let fallback = item.item.full_text.clone();
            match outcome {
                None => EnrichedItem {
                    item,
                    full_text: fallback,
                    fetch: FetchOutcome::NotSelected,
                },
                Some(Ok(text)) => {
                    let text = text.trim();
                    let chars = text.chars().count();
                    if chars < settings.min_chars {
                        failed += 1;
                        let err = ItemError::Enrichment(format!("extracted text too short ({chars} chars)"));
                        warn!(url = item.item.source_url.as_str(), error = %err, "Enrichment failed");
                        return EnrichedItem {
                            item,
                            full_text: fallback,
                            fetch: FetchOutcome::Failed { error: err.to_string() },
                        };
                    }
                    fetched += 1;
                    let text = truncate_chars(text, settings.max_chars);
                    let chars = text.chars().count();
                    EnrichedItem {
                        item,
                        full_text: Some(text),
                        fetch: FetchOutcome::Fetched { chars },
                    }
                }
                Some(Err(e)) => {
                    failed += 1;
                    let err = match e {
                        TaskError::TimedOut => ItemError::EnrichmentTimeout,
                        other => item_error(other, ItemError::Enrichment),
                    };
                    warn!(url = item.item.source_url.as_str(), error = %err, "Enrichment failed");
                    EnrichedItem {
                        item,
                        full_text: fallback,
                        fetch: FetchOutcome::Failed { error: err.to_string() },
                    }
                }
            }
        })
        .collect();

    info!(
        survivors = enriched.len(),
        fetched,
        failed,
        not_selected = enriched.len() - fetched - failed,
        "Enrichment complete"
    );
    enriched
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealwire_common::{DealType, ItemCategory, RawItem, RelevanceLevel, StageLimits};
    use std::collections::HashMap;
    use tokio_util::sync::CancellationToken;

    fn survivor(url: &str, level: RelevanceLevel, confidence: u8) -> ClassifiedItem {
        ClassifiedItem {
            item: RawItem::new("rss", "Wire", url, "t", "summary", None),
            is_relevant: true,
            category: ItemCategory::Industry,
            deal_type: DealType::NotADeal,
            relevance_level: level,
            related_entity: None,
            confidence,
            reason: None,
            classification_error: None,
        }
    }

    struct MapFetcher(HashMap<String, Result<String, CallError>>);

    #[async_trait]
    impl DocumentFetcher for MapFetcher {
        async fn fetch(&self, url: &str) -> Result<String, CallError> {
            self.0
                .get(url)
                .cloned()
                .unwrap_or_else(|| Err(CallError::Failed("unknown url".into())))
        }
    }

    fn settings(max_items: usize) -> EnrichSettings {
        EnrichSettings {
            max_items,
            max_chars: 10,
            min_chars: 3,
            limits: StageLimits::per_minute(4, 1000),
        }
    }

    #[test]
    fn priority_prefers_trusted_then_relevance_then_confidence() {
        let items = vec![
            survivor("https://blog.net/1", RelevanceLevel::Low, 90),
            survivor("https://blog.net/2", RelevanceLevel::High, 50),
            survivor("https://reuters.com/3", RelevanceLevel::Low, 10),
            survivor("https://blog.net/4", RelevanceLevel::High, 80),
        ];
        let order = fetch_priority(&items, &["reuters.com".to_string()]);
        assert_eq!(order, vec![2, 3, 1, 0]);
    }

    #[tokio::test]
    async fn outputs_align_with_survivors_and_record_outcomes() {
        let items = vec![
            survivor("https://a.com/long", RelevanceLevel::High, 90),
            survivor("https://a.com/short", RelevanceLevel::High, 80),
            survivor("https://a.com/slow", RelevanceLevel::High, 70),
            survivor("https://a.com/skipped", RelevanceLevel::Low, 10),
        ];
        let fetcher = MapFetcher(HashMap::from([
            ("https://a.com/long".to_string(), Ok("  0123456789abcdef  ".to_string())),
            ("https://a.com/short".to_string(), Ok("ab".to_string())),
            ("https://a.com/slow".to_string(), Err(CallError::TimedOut)),
        ]));
        let executor = Executor::new("enrich", &StageLimits::per_minute(4, 1000), CancellationToken::new());

        let out = enrich(&executor, &fetcher, items, &settings(3), &[]).await;

        assert_eq!(out.len(), 4);
        assert_eq!(out[0].full_text.as_deref(), Some("0123456789"));
        assert_eq!(out[0].fetch, FetchOutcome::Fetched { chars: 10 });
        assert!(matches!(out[1].fetch, FetchOutcome::Failed { .. }));
        assert_eq!(out[1].full_text, None);
        assert_eq!(
            out[2].fetch,
            FetchOutcome::Failed { error: ItemError::EnrichmentTimeout.to_string() }
        );
        assert_eq!(out[3].fetch, FetchOutcome::NotSelected);
        assert_eq!(out[3].item.item.summary, "summary");
    }

    #[test]
    fn text_content_types() {
        assert!(is_text_content("text/html; charset=utf-8"));
        assert!(is_text_content("application/xhtml+xml"));
        assert!(!is_text_content("application/pdf"));
    }
}
