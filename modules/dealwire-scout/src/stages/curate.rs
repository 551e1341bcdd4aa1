use std::cmp::Reverse;
use std::collections::HashMap;

use dealwire_common::{
    AnalyzedItem, CurationDecision, CurationReason, CurationSettings, DigestSection,
};
use serde::{Deserialize, Serialize};
use tracing::info;

const OTHER_GROUP: &str = "Other";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurationOutput {
    /// One decision per analyzed item, index-aligned with the input.
    pub decisions: Vec<CurationDecision>,
    /// Included item ids in digest order.
    pub selected: Vec<String>,
}

impl CurationOutput {
    pub fn count(&self, reason: CurationReason) -> usize {
        self.decisions.iter().filter(|d| d.reason == reason).count()
    }
}

pub fn group_label(item: &AnalyzedItem) -> String {
    item.item
        .related_entity
        .clone()
        .unwrap_or_else(|| OTHER_GROUP.to_string())
}

/// Decide which analyzed items make the digest and in what order.
///
/// Items are considered in canonical order (score desc, newest first with
/// undated last, id asc) so caps always keep the same items. Items carrying
/// an exempt flag bypass the threshold and every cap without using a slot.
pub fn curate(items: &[AnalyzedItem], settings: &CurationSettings) -> CurationOutput {
    let canonical = canonical_order(items);

    let mut decisions: Vec<Option<CurationDecision>> = (0..items.len()).map(|_| None).collect();
    let mut per_group: HashMap<(DigestSection, String), usize> = HashMap::new();
    let mut per_section: HashMap<DigestSection, usize> = HashMap::new();
    let mut total = 0usize;

    for &index in &canonical {
        let item = &items[index];
        let section = item.item.category.section();
        let group = group_label(item);

        let exempt = section.is_some()
            && item
                .opportunity_flags
                .iter()
                .any(|f| settings.exempt_flags.contains(f));

        let reason = match section {
            Some(_) if exempt => CurationReason::FlagOverride,
            None => CurationReason::ScoreThreshold,
            Some(_) if item.signal_score < settings.threshold_for(item.item.category) => {
                CurationReason::ScoreThreshold
            }
            Some(section) => {
                let group_count = per_group.entry((section, group.clone())).or_insert(0);
                let section_count = per_section.entry(section).or_insert(0);
                let section_cap = settings.section_caps.get(&section).copied().unwrap_or(usize::MAX);
                if *group_count >= settings.max_per_group
                    || *section_count >= section_cap
                    || total >= settings.max_total
                {
                    CurationReason::CapExceeded
                } else {
                    *group_count += 1;
                    *section_count += 1;
                    total += 1;
                    CurationReason::Selected
                }
            }
        };

        decisions[index] = Some(CurationDecision {
            item_id: item.item.item.id.clone(),
            included: matches!(reason, CurationReason::Selected | CurationReason::FlagOverride),
            reason,
            section,
            group,
            rank: None,
        });
    }

    let mut decisions: Vec<CurationDecision> = decisions.into_iter().flatten().collect();
    let selected = rank_selected(items, &mut decisions, &canonical);

    let output = CurationOutput { decisions, selected };
    info!(
        analyzed = items.len(),
        selected = output.count(CurationReason::Selected),
        flag_override = output.count(CurationReason::FlagOverride),
        below_threshold = output.count(CurationReason::ScoreThreshold),
        capped = output.count(CurationReason::CapExceeded),
        "Curation complete"
    );
    output
}

fn canonical_order(items: &[AnalyzedItem]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|&a, &b| {
        let (x, y) = (&items[a], &items[b]);
        (Reverse(x.signal_score), Reverse(x.item.item.published_at), x.id()).cmp(&(
            Reverse(y.signal_score),
            Reverse(y.item.item.published_at),
            y.id(),
        ))
    });
    order
}

/// Sections in fixed order; groups by best score desc, then label; items in
/// canonical order. Writes ranks into `decisions` and returns the ids.
fn rank_selected(
    items: &[AnalyzedItem],
    decisions: &mut [CurationDecision],
    canonical: &[usize],
) -> Vec<String> {
    let mut best: HashMap<(DigestSection, &str), u8> = HashMap::new();
    for (item, decision) in items.iter().zip(decisions.iter()) {
        if let (true, Some(section)) = (decision.included, decision.section) {
            let score = best.entry((section, decision.group.as_str())).or_insert(0);
            *score = (*score).max(item.signal_score);
        }
    }

    let position: HashMap<usize, usize> = canonical
        .iter()
        .enumerate()
        .map(|(pos, &index)| (index, pos))
        .collect();

    let mut included: Vec<usize> = (0..items.len())
        .filter(|&i| decisions[i].included && decisions[i].section.is_some())
        .collect();
    included.sort_by_key(|&i| {
        let d = &decisions[i];
        let section = d.section.unwrap_or(DigestSection::Deals);
        let group_best = best.get(&(section, d.group.as_str())).copied().unwrap_or(0);
        (section, Reverse(group_best), d.group.clone(), position[&i])
    });

    let mut selected = Vec::with_capacity(included.len());
    for (rank, index) in included.into_iter().enumerate() {
        decisions[index].rank = Some(rank);
        selected.push(decisions[index].item_id.clone());
    }
    selected
}
