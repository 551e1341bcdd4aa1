use dealwire_common::{ClassifiedItem, ItemError, RawItem};
use tracing::{info, warn};

use super::item_error;
use crate::executor::{CallError, Executor};
use crate::inference::{Classification, Classifier};

/// Classify every collected item. The output is index-aligned with `items`;
/// a failed call yields a not-relevant item with `classification_error` set.
pub async fn classify_items(
    executor: &Executor,
    classifier: &dyn Classifier,
    items: Vec<RawItem>,
    tracked_entities: &[String],
) -> Vec<ClassifiedItem> {
    let indices: Vec<usize> = (0..items.len()).collect();
    let pending = &items;
    let results = executor
        .run_all(indices, move |index| {
            let item = &pending[index];
            async move {
                classifier
                    .classify(item, tracked_entities)
                    .await
                    .map_err(CallError::from)
            }
        })
        .await;

    let mut failed = 0usize;
    let classified: Vec<ClassifiedItem> = items
        .into_iter()
        .zip(results)
        .map(|(item, result)| match result {
            Ok(classification) => from_classification(item, classification),
            Err(e) => {
                failed += 1;
                let err = item_error(e, ItemError::Classification);
                warn!(item_id = item.id.as_str(), title = item.title.as_str(), error = %err, "Classification failed");
                ClassifiedItem::rejected(item, err.to_string())
            }
        })
        .collect();

    info!(
        total = classified.len(),
        relevant = classified.iter().filter(|c| c.is_relevant).count(),
        failed,
        "Classification complete"
    );
    classified
}

fn from_classification(item: RawItem, c: Classification) -> ClassifiedItem {
    ClassifiedItem {
        item,
        is_relevant: c.is_relevant,
        category: c.category,
        deal_type: c.deal_type,
        relevance_level: c.relevance_level,
        related_entity: c
            .related_entity
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty()),
        confidence: c.confidence,
        reason: c.reason,
        classification_error: None,
    }
}
