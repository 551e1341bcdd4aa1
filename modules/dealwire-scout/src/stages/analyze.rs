use dealwire_common::{AnalyzedItem, EnrichedItem, ItemError};
use tracing::{info, warn};

use super::item_error;
use crate::executor::{CallError, Executor};
use crate::inference::Analyzer;

/// Score every enriched survivor. Output is index-aligned with `items`. A
/// failed analysis scores 0 with no flags, so curation drops it by threshold.
pub async fn analyze(
    executor: &Executor,
    analyzer: &dyn Analyzer,
    items: Vec<EnrichedItem>,
) -> Vec<AnalyzedItem> {
    let indices: Vec<usize> = (0..items.len()).collect();
    let pending = &items;
    let results = executor
        .run_all(indices, move |index| {
            let item = &pending[index];
            async move { analyzer.analyze(item).await.map_err(CallError::from) }
        })
        .await;

    let mut failed = 0usize;
    let analyzed: Vec<AnalyzedItem> = items
        .into_iter()
        .zip(results)
        .map(|(enriched, result)| {
            let used_full_text = enriched.full_text.is_some();
            match result {
                Ok(analysis) => AnalyzedItem {
                    opportunity_flags: analysis.opportunity_flags(),
                    signal_score: analysis.signal_score,
                    why_it_matters: Some(analysis.why_it_matters),
                    used_full_text,
                    analysis_error: None,
                    item: enriched.item,
                },
                Err(e) => {
                    failed += 1;
                    let err = item_error(e, ItemError::Analysis);
                    warn!(item_id = enriched.id(), error = %err, "Analysis failed");
                    AnalyzedItem::failed(enriched.item, used_full_text, err.to_string())
                }
            }
        })
        .collect();

    info!(
        total = analyzed.len(),
        failed,
        flagged = analyzed.iter().filter(|a| !a.opportunity_flags.is_empty()).count(),
        "Analysis complete"
    );
    analyzed
}
