//! Source collectors and the collection stage.

mod rss;
mod search;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dealwire_common::{ItemError, RawItem};
use futures::future;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::executor::{CallError, Executor};

pub use rss::{strip_html, RssCollector};
pub use search::SerperNewsCollector;

/// A feed-style or query-style source. A failure only costs this source's items.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Human-readable source name (feed title, query text).
    fn name(&self) -> &str;
    /// Provider family, e.g. `rss` or `serper`.
    fn provider(&self) -> &str;
    async fn collect(&self) -> Result<Vec<RawItem>, CallError>;
}

/// Per-source outcome recorded with the stage output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceReport {
    pub name: String,
    pub provider: String,
    pub fetched: usize,
    pub kept: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectOutput {
    pub items: Vec<RawItem>,
    pub sources: Vec<SourceReport>,
    pub dropped_stale: usize,
    pub dropped_duplicates: usize,
}

impl CollectOutput {
    pub fn failed_sources(&self) -> usize {
        self.sources.iter().filter(|s| s.error.is_some()).count()
    }
}

/// Lookback rule applied to collected items.
#[derive(Debug, Clone, Copy)]
pub struct Freshness {
    pub cutoff: DateTime<Utc>,
    pub keep_undated: bool,
}

impl Freshness {
    pub fn new(run_started_at: DateTime<Utc>, lookback_days: i64, keep_undated: bool) -> Self {
        Self {
            cutoff: run_started_at - Duration::days(lookback_days),
            keep_undated,
        }
    }

    pub fn keeps(&self, item: &RawItem) -> bool {
        match item.published_at {
            Some(published) => published >= self.cutoff,
            None => self.keep_undated,
        }
    }
}

/// Run every collector on the executor for its provider. Sources are
/// isolated: a failed collector contributes zero items and an error in its
/// report.
pub async fn collect_all(
    executors: &BTreeMap<String, Executor>,
    collectors: &[Arc<dyn Collector>],
    freshness: Freshness,
) -> CollectOutput {
    let batches = executors.iter().map(|(provider, executor)| {
        let indices: Vec<usize> = collectors
            .iter()
            .enumerate()
            .filter(|(_, c)| c.provider() == provider.as_str())
            .map(|(i, _)| i)
            .collect();
        async move {
            let results = executor
                .run_all(indices.clone(), move |index| async move {
                    collectors[index].collect().await
                })
                .await;
            indices.into_iter().zip(results).collect::<Vec<_>>()
        }
    });

    let mut results: Vec<Option<Result<Vec<RawItem>, String>>> =
        (0..collectors.len()).map(|_| None).collect();
    for (index, result) in future::join_all(batches).await.into_iter().flatten() {
        results[index] = Some(result.map_err(|e| e.to_string()));
    }

    let mut seen = HashSet::new();
    let mut output = CollectOutput {
        items: Vec::new(),
        sources: Vec::with_capacity(collectors.len()),
        dropped_stale: 0,
        dropped_duplicates: 0,
    };

    for (collector, result) in collectors.iter().zip(results) {
        let mut report = SourceReport {
            name: collector.name().to_string(),
            provider: collector.provider().to_string(),
            fetched: 0,
            kept: 0,
            error: None,
        };

        let result = result.unwrap_or_else(|| {
            Err(format!("no executor for provider {}", collector.provider()))
        });
        match result {
            Ok(items) => {
                report.fetched = items.len();
                for item in items {
                    if !freshness.keeps(&item) {
                        output.dropped_stale += 1;
                        continue;
                    }
                    if !seen.insert(item.id.clone()) {
                        output.dropped_duplicates += 1;
                        continue;
                    }
                    report.kept += 1;
                    output.items.push(item);
                }
            }
            Err(e) => {
                let err = ItemError::Collection {
                    source_name: collector.name().to_string(),
                    message: e,
                };
                warn!(source = collector.name(), provider = collector.provider(), error = %err, "Collector failed");
                report.error = Some(err.to_string());
            }
        }
        output.sources.push(report);
    }

    info!(
        items = output.items.len(),
        sources = output.sources.len(),
        failed_sources = output.failed_sources(),
        dropped_stale = output.dropped_stale,
        dropped_duplicates = output.dropped_duplicates,
        "Collection complete"
    );
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn freshness_applies_lookback_and_undated_rule() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let mut item = RawItem::new("rss", "F", "https://a.com/1", "t", "s", None);

        let keep = Freshness::new(now, 7, true);
        let drop = Freshness::new(now, 7, false);
        assert!(keep.keeps(&item));
        assert!(!drop.keeps(&item));

        item.published_at = Some(now - Duration::days(8));
        assert!(!keep.keeps(&item));
        item.published_at = Some(now - Duration::days(6));
        assert!(keep.keeps(&item));
    }
}
