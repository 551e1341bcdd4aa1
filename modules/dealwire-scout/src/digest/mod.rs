//! Digest composition, rendering and persistence.

mod artifact;
mod markdown;

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};
use dealwire_common::{AnalyzedItem, CurationReason, DigestSection, OpportunityFlag};
use serde::{Deserialize, Serialize};

use crate::inference::CarveOutResearch;
use crate::stages::{CurationOutput, ResearchOutput};

pub use artifact::{ArtifactLocation, ArtifactSink, FileArtifactSink};
pub use markdown::render_markdown;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestEntry {
    pub item_id: String,
    pub title: String,
    pub url: String,
    pub source_name: String,
    pub published_at: Option<DateTime<Utc>>,
    pub deal_type: String,
    pub signal_score: u8,
    pub opportunity_flags: BTreeSet<OpportunityFlag>,
    pub why_it_matters: Option<String>,
    pub flag_override: bool,
    #[serde(default)]
    pub carve_out_research: Option<CarveOutResearch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestGroup {
    pub label: String,
    pub entries: Vec<DigestEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestSectionBlock {
    pub section: DigestSection,
    pub title: String,
    pub groups: Vec<DigestGroup>,
}

/// Per-run counters shown in the digest footer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestCounts {
    pub sources: usize,
    pub failed_sources: usize,
    pub collected: usize,
    pub relevant: usize,
    pub survivors: usize,
    pub analyzed: usize,
    pub included: usize,
    #[serde(default)]
    pub classification_errors: usize,
    #[serde(default)]
    pub fetch_failed: usize,
    #[serde(default)]
    pub analysis_errors: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Digest {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub sections: Vec<DigestSectionBlock>,
    pub is_empty: bool,
    pub counts: DigestCounts,
}

impl Digest {
    pub fn entries(&self) -> impl Iterator<Item = &DigestEntry> {
        self.sections
            .iter()
            .flat_map(|s| s.groups.iter())
            .flat_map(|g| g.entries.iter())
    }
}

/// Builds a `Digest` from curated items. Output depends only on the inputs,
/// so recomposing a resumed run yields the same document.
#[derive(Debug, Clone)]
pub struct DigestComposer {
    lookback_days: i64,
}

impl DigestComposer {
    pub fn new(lookback_days: i64) -> Self {
        Self { lookback_days }
    }

    pub fn compose(
        &self,
        run_id: &str,
        run_started_at: DateTime<Utc>,
        analyzed: &[AnalyzedItem],
        curation: &CurationOutput,
        research: &ResearchOutput,
        mut counts: DigestCounts,
    ) -> Digest {
        let by_id: HashMap<&str, &AnalyzedItem> = analyzed.iter().map(|a| (a.id(), a)).collect();
        let decisions: HashMap<&str, _> = curation
            .decisions
            .iter()
            .map(|d| (d.item_id.as_str(), d))
            .collect();

        let mut sections: Vec<DigestSectionBlock> = Vec::new();
        for id in &curation.selected {
            let (Some(item), Some(decision)) = (by_id.get(id.as_str()), decisions.get(id.as_str()))
            else {
                continue;
            };
            let Some(section) = decision.section else {
                continue;
            };

            if sections.last().map(|s| s.section) != Some(section) {
                sections.push(DigestSectionBlock {
                    section,
                    title: section.title().to_string(),
                    groups: Vec::new(),
                });
            }
            let Some(block) = sections.last_mut() else {
                continue;
            };
            if block.groups.last().map(|g| g.label.as_str()) != Some(decision.group.as_str()) {
                block.groups.push(DigestGroup {
                    label: decision.group.clone(),
                    entries: Vec::new(),
                });
            }
            if let Some(group) = block.groups.last_mut() {
                group
                    .entries
                    .push(entry_for(item, decision.reason, research.research_for(id)));
            }
        }

        counts.included = sections
            .iter()
            .flat_map(|s| s.groups.iter())
            .map(|g| g.entries.len())
            .sum();

        Digest {
            run_id: run_id.to_string(),
            generated_at: run_started_at,
            period_start: run_started_at - Duration::days(self.lookback_days),
            period_end: run_started_at,
            is_empty: sections.is_empty(),
            sections,
            counts,
        }
    }
}

fn entry_for(
    item: &AnalyzedItem,
    reason: CurationReason,
    research: Option<&CarveOutResearch>,
) -> DigestEntry {
    let raw = &item.item.item;
    DigestEntry {
        item_id: raw.id.clone(),
        title: raw.title.clone(),
        url: raw.source_url.clone(),
        source_name: raw.source_name.clone(),
        published_at: raw.published_at,
        deal_type: item.item.deal_type.label().to_string(),
        signal_score: item.signal_score,
        opportunity_flags: item.opportunity_flags.clone(),
        why_it_matters: item.why_it_matters.clone(),
        flag_override: reason == CurationReason::FlagOverride,
        carve_out_research: research.cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{ResearchConfidence, SeparationComplexity};
    use crate::stages::{curate, CarveOutDossier};
    use chrono::TimeZone;
    use dealwire_common::{
        ClassifiedItem, CurationSettings, DealType, ItemCategory, RawItem, RelevanceLevel,
    };

    fn analyzed(n: u32, category: ItemCategory, entity: &str, score: u8) -> AnalyzedItem {
        AnalyzedItem {
            item: ClassifiedItem {
                item: RawItem::new("rss", "Wire", format!("https://w.com/{n}"), format!("Story {n}"), "s", None),
                is_relevant: true,
                category,
                deal_type: DealType::MaAcquisition,
                relevance_level: RelevanceLevel::High,
                related_entity: Some(entity.to_string()),
                confidence: 90,
                reason: None,
                classification_error: None,
            },
            signal_score: score,
            opportunity_flags: BTreeSet::new(),
            why_it_matters: Some("It matters.".into()),
            used_full_text: true,
            analysis_error: None,
        }
    }

    fn started() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 6, 0, 0).unwrap()
    }

    #[test]
    fn sections_and_groups_follow_curation_order() {
        let items = vec![
            analyzed(1, ItemCategory::MajorDeal, "Zed", 90),
            analyzed(2, ItemCategory::Portfolio, "Acme", 70),
            analyzed(3, ItemCategory::Portfolio, "Acme", 65),
            analyzed(4, ItemCategory::Competitor, "Rival", 10),
        ];
        let curation = curate(&items, &CurationSettings::default());

        let digest = DigestComposer::new(7).compose(
            "run-1",
            started(),
            &items,
            &curation,
            &ResearchOutput::default(),
            DigestCounts::default(),
        );

        assert!(!digest.is_empty);
        assert_eq!(digest.sections.len(), 2);
        assert_eq!(digest.sections[0].section, DigestSection::Portfolio);
        assert_eq!(digest.sections[0].groups[0].label, "Acme");
        assert_eq!(digest.sections[0].groups[0].entries.len(), 2);
        assert_eq!(digest.sections[1].section, DigestSection::Deals);
        assert_eq!(digest.counts.included, 3);
        assert_eq!(digest.period_end, started());
        assert_eq!(digest.period_start, started() - Duration::days(7));
        assert_eq!(digest.generated_at, started());
    }

    #[test]
    fn research_is_attached_to_its_entry() {
        let mut flagged = analyzed(1, ItemCategory::MajorDeal, "Zed", 90);
        flagged.opportunity_flags.insert(OpportunityFlag::CarveOutHigh);
        let items = vec![flagged, analyzed(2, ItemCategory::Portfolio, "Acme", 70)];
        let curation = curate(&items, &CurationSettings::default());
        let research = ResearchOutput {
            dossiers: vec![CarveOutDossier {
                item_id: items[0].id().to_string(),
                research: Some(CarveOutResearch {
                    deal_summary: "Zed is selling a unit.".into(),
                    potential_assets: vec!["Unit".into()],
                    separation_complexity: SeparationComplexity::Low,
                    risks: Vec::new(),
                    diligence_questions: Vec::new(),
                    next_steps: Vec::new(),
                    confidence: ResearchConfidence::High,
                }),
                error: None,
            }],
        };

        let digest = DigestComposer::new(7).compose(
            "run-3",
            started(),
            &items,
            &curation,
            &research,
            DigestCounts::default(),
        );

        let by_title: HashMap<&str, &DigestEntry> =
            digest.entries().map(|e| (e.title.as_str(), e)).collect();
        let zed = by_title["Story 1"].carve_out_research.as_ref().unwrap();
        assert_eq!(zed.deal_summary, "Zed is selling a unit.");
        assert!(by_title["Story 2"].carve_out_research.is_none());
    }

    #[test]
    fn no_items_compose_an_empty_digest() {
        let curation = CurationOutput {
            decisions: Vec::new(),
            selected: Vec::new(),
        };
        let digest = DigestComposer::new(7).compose(
            "run-2",
            started(),
            &[],
            &curation,
            &ResearchOutput::default(),
            DigestCounts::default(),
        );
        assert!(digest.is_empty);
        assert!(digest.sections.is_empty());
        assert_eq!(digest.entries().count(), 0);
    }
}
