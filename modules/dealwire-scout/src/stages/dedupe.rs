use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use dealwire_common::{canonical_url, is_trusted_domain, ClassifiedItem, DedupEntry, DuplicateGroup};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupOutput {
    /// One group per canonical key, in first-appearance order.
    pub groups: Vec<DuplicateGroup>,
    /// One entry per relevant input item, in input order.
    pub entries: Vec<DedupEntry>,
    /// Survivors in first-appearance order.
    pub survivors: Vec<ClassifiedItem>,
}

impl DedupOutput {
    pub fn superseded(&self) -> usize {
        self.entries.iter().filter(|e| e.superseded_by.is_some()).count()
    }
}

/// Collapse relevant items that point at the same canonical URL.
///
/// The survivor of a group does not depend on input order: candidates are
/// ranked by trusted domain, then longer summary, then earliest publication
/// (undated last), then smallest id.
pub fn dedupe(items: &[ClassifiedItem], trusted_domains: &[String]) -> DedupOutput {
    let relevant: Vec<&ClassifiedItem> = items.iter().filter(|c| c.is_relevant).collect();

    let mut order: Vec<String> = Vec::new();
    let mut members: HashMap<String, Vec<&ClassifiedItem>> = HashMap::new();
    let mut keys: Vec<String> = Vec::with_capacity(relevant.len());

    for item in relevant.iter().copied() {
        let key = canonical_url(&item.item.source_url);
        members
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key.clone());
                Vec::new()
            })
            .push(item);
        keys.push(key);
    }

    let mut survivor_by_key: HashMap<&str, &str> = HashMap::new();
    let mut groups = Vec::with_capacity(order.len());
    for key in &order {
        let group = &members[key];
        let Some(survivor) = group
            .iter()
            .copied()
            .min_by(|a, b| rank(a, b, trusted_domains))
        else {
            continue;
        };

        let mut member_ids: Vec<String> = group.iter().map(|c| c.item.id.clone()).collect();
        member_ids.sort();
        member_ids.dedup();
        if member_ids.len() > 1 {
            debug!(key = key.as_str(), members = member_ids.len(), survivor = survivor.id(), "Duplicate group");
        }

        survivor_by_key.insert(key.as_str(), survivor.id());
        groups.push(DuplicateGroup {
            key: key.clone(),
            member_ids,
            survivor_id: survivor.item.id.clone(),
        });
    }

    let mut entries = Vec::with_capacity(relevant.len());
    let mut survivors = Vec::new();
    let mut emitted: HashSet<&str> = HashSet::new();
    for (item, key) in relevant.iter().zip(&keys) {
        let survivor_id = survivor_by_key.get(key.as_str()).copied().unwrap_or(item.id());
        let is_survivor = survivor_id == item.id();
        entries.push(DedupEntry {
            item_id: item.item.id.clone(),
            group_key: key.clone(),
            superseded_by: (!is_survivor).then(|| survivor_id.to_string()),
        });
        if is_survivor && emitted.insert(item.id()) {
            survivors.push((*item).clone());
        }
    }

    let output = DedupOutput {
        groups,
        entries,
        survivors,
    };
    info!(
        relevant = relevant.len(),
        groups = output.groups.len(),
        superseded = output.superseded(),
        survivors = output.survivors.len(),
        "Deduplication complete"
    );
    output
}

/// `Less` means `a` is the better survivor.
fn rank(a: &ClassifiedItem, b: &ClassifiedItem, trusted_domains: &[String]) -> Ordering {
    let a_trusted = is_trusted_domain(&a.item.source_url, trusted_domains);
    let b_trusted = is_trusted_domain(&b.item.source_url, trusted_domains);

    b_trusted
        .cmp(&a_trusted)
        .then_with(|| summary_len(b).cmp(&summary_len(a)))
        .then_with(|| match (a.item.published_at, b.item.published_at) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.item.id.cmp(&b.item.id))
}

fn summary_len(item: &ClassifiedItem) -> usize {
    item.item.summary.trim().chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use dealwire_common::{DealType, ItemCategory, RawItem, RelevanceLevel};

    fn relevant(source: &str, url: &str, summary: &str) -> ClassifiedItem {
        ClassifiedItem {
            item: RawItem::new("rss", source, url, "Acme buys Beta", summary, None),
            is_relevant: true,
            category: ItemCategory::MajorDeal,
            deal_type: DealType::MaAcquisition,
            relevance_level: RelevanceLevel::High,
            related_entity: Some("Acme".into()),
            confidence: 80,
            reason: None,
            classification_error: None,
        }
    }

    #[test]
    fn tracking_variants_collapse_into_one_group() {
        let items = vec![
            relevant("Wire", "https://x.com/a?utm=1", "short"),
            relevant("Wire", "https://x.com/a?utm=2", "a much longer summary"),
            relevant("Wire", "https://x.com/a", "mid length"),
        ];

        let out = dedupe(&items, &[]);

        assert_eq!(out.groups.len(), 1);
        assert_eq!(out.groups[0].member_ids.len(), 3);
        assert_eq!(out.groups[0].survivor_id, items[1].item.id);
        assert_eq!(out.survivors.len(), 1);
        assert_eq!(out.survivors[0].item.id, items[1].item.id);
        assert_eq!(out.entries.len(), 3);
        assert_eq!(out.superseded(), 2);
        assert_eq!(out.entries[0].superseded_by.as_deref(), Some(items[1].id()));
    }

    #[test]
    fn distinct_urls_stay_separate() {
        let items = vec![
            relevant("Wire", "https://www.reuters.com/acme/", "short"),
            relevant("Mirror", "https://mirror.net/acme", "a much longer summary"),
            relevant("Wire", "https://reuters.com/acme?utm_source=x", "longer summary"),
        ];
        let trusted = vec!["reuters.com".to_string()];

        let out = dedupe(&items, &trusted);

        assert_eq!(out.groups.len(), 2);
        let reuters = &out.groups[0];
        assert_eq!(reuters.key, "https://reuters.com/acme");
        assert_eq!(reuters.member_ids.len(), 2);
        assert_eq!(reuters.survivor_id, items[2].item.id);
        assert_eq!(out.survivors.len(), 2);
        assert_eq!(out.survivors[0].item.id, items[1].item.id);
        assert_eq!(out.survivors[1].item.id, items[2].item.id);
    }

    #[test]
    fn trusted_domain_ranks_first() {
        let trusted = vec!["reuters.com".to_string()];
        let a = relevant("Wire", "https://reuters.com/acme", "short");
        let b = relevant("Blog", "https://blog.net/acme", "a much longer summary");
        assert_eq!(rank(&a, &b, &trusted), Ordering::Less);
        assert_eq!(rank(&a, &b, &[]), Ordering::Greater);
    }

    #[test]
    fn earlier_publication_breaks_summary_ties() {
        let mut early = relevant("A", "https://x.com/p", "same");
        let mut late = relevant("B", "https://x.com/p/", "same");
        early.item.published_at = Some(Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap());
        late.item.published_at = Some(Utc.with_ymd_and_hms(2026, 3, 5, 0, 0, 0).unwrap());
        let undated = relevant("C", "https://x.com/p#top", "same");

        let out = dedupe(&[late.clone(), undated, early.clone()], &[]);
        assert_eq!(out.groups.len(), 1);
        assert_eq!(out.groups[0].survivor_id, early.item.id);
    }

    #[test]
    fn survivor_is_independent_of_input_order() {
        let a = relevant("A", "https://x.com/q?ref=tw", "same text");
        let b = relevant("B", "https://x.com/q", "same text");
        let c = relevant("C", "https://x.com/q?fbclid=1", "same text");

        let forward = dedupe(&[a.clone(), b.clone(), c.clone()], &[]);
        let backward = dedupe(&[c, b, a], &[]);
        assert_eq!(forward.groups[0].survivor_id, backward.groups[0].survivor_id);
        assert_eq!(forward.groups[0].member_ids, backward.groups[0].member_ids);
    }

    #[test]
    fn irrelevant_items_are_ignored() {
        let mut noise = relevant("A", "https://x.com/noise", "n");
        noise.is_relevant = false;
        let out = dedupe(&[noise], &[]);
        assert!(out.groups.is_empty());
        assert!(out.entries.is_empty());
        assert!(out.survivors.is_empty());
    }
}
