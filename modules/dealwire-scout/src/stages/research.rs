use std::collections::HashMap;

use dealwire_common::{AnalyzedItem, EnrichedItem, ItemError, ResearchSettings};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{item_error, CurationOutput};
use crate::executor::{CallError, Executor};
use crate::inference::{CarveOutResearch, CarveOutResearcher};

/// Research outcome for one curated candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarveOutDossier {
    pub item_id: String,
    pub research: Option<CarveOutResearch>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchOutput {
    /// One dossier per candidate, in research priority order.
    pub dossiers: Vec<CarveOutDossier>,
}

impl ResearchOutput {
    pub fn researched(&self) -> usize {
        self.dossiers.iter().filter(|d| d.research.is_some()).count()
    }

    pub fn failed(&self) -> usize {
        self.dossiers.iter().filter(|d| d.error.is_some()).count()
    }

    pub fn research_for(&self, item_id: &str) -> Option<&CarveOutResearch> {
        self.dossiers
            .iter()
            .find(|d| d.item_id == item_id)
            .and_then(|d| d.research.as_ref())
    }
}

/// Curated items carrying one of `settings.flags`. Items with an earlier
/// flag in the list come first, ties keep digest order, and at most
/// `settings.max_items` are returned.
pub fn research_candidates<'a>(
    analyzed: &'a [AnalyzedItem],
    curation: &CurationOutput,
    settings: &ResearchSettings,
) -> Vec<&'a AnalyzedItem> {
    let by_id: HashMap<&str, &AnalyzedItem> = analyzed.iter().map(|a| (a.id(), a)).collect();
    let mut ranked: Vec<(usize, &AnalyzedItem)> = curation
        .selected
        .iter()
        .filter_map(|id| by_id.get(id.as_str()).copied())
        .filter_map(|item| {
            settings
                .flags
                .iter()
                .position(|flag| item.opportunity_flags.contains(flag))
                .map(|rank| (rank, item))
        })
        .collect();
    ranked.sort_by_key(|(rank, _)| *rank);
    ranked
        .into_iter()
        .take(settings.max_items)
        .map(|(_, item)| item)
        .collect()
}

/// Research flagged curated items. A failed call leaves its dossier with an
/// error and no findings; it never fails the stage.
pub async fn research(
    executor: &Executor,
    researcher: &dyn CarveOutResearcher,
    analyzed: &[AnalyzedItem],
    enriched: &[EnrichedItem],
    curation: &CurationOutput,
    settings: &ResearchSettings,
) -> ResearchOutput {
    let candidates = research_candidates(analyzed, curation, settings);
    if candidates.is_empty() {
        info!("No carve-out candidates to research");
        return ResearchOutput::default();
    }

    let full_text: HashMap<&str, &str> = enriched
        .iter()
        .filter_map(|e| e.full_text.as_deref().map(|text| (e.id(), text)))
        .collect();

    let indices: Vec<usize> = (0..candidates.len()).collect();
    let pending = &candidates;
    let texts = &full_text;
    let results = executor
        .run_all(indices, move |index| {
            let item = pending[index];
            let text = texts.get(item.id()).copied();
            async move { researcher.research(item, text).await.map_err(CallError::from) }
        })
        .await;

    let dossiers: Vec<CarveOutDossier> = candidates
        .iter()
        .zip(results)
        .map(|(item, result)| match result {
            Ok(research) => CarveOutDossier {
                item_id: item.id().to_string(),
                research: Some(research),
                error: None,
            },
            Err(e) => {
                let err = item_error(e, ItemError::Research);
                warn!(item_id = item.id(), error = %err, "Carve-out research failed");
                CarveOutDossier {
                    item_id: item.id().to_string(),
                    research: None,
                    error: Some(err.to_string()),
                }
            }
        })
        .collect();

    let output = ResearchOutput { dossiers };
    info!(
        candidates = output.dossiers.len(),
        researched = output.researched(),
        failed = output.failed(),
        "Carve-out research complete"
    );
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{InferenceError, ResearchConfidence, SeparationComplexity};
    use async_trait::async_trait;
    use dealwire_common::{
        ClassifiedItem, CurationSettings, DealType, FetchOutcome, ItemCategory, OpportunityFlag,
        RawItem, RelevanceLevel, StageLimits,
    };
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    use crate::stages::curate;

    struct EchoResearcher {
        seen: Mutex<Vec<(String, Option<String>)>>,
    }

    #[async_trait]
    impl CarveOutResearcher for EchoResearcher {
        async fn research(
            &self,
            item: &AnalyzedItem,
            full_text: Option<&str>,
        ) -> Result<CarveOutResearch, InferenceError> {
            self.seen
                .lock()
                .unwrap()
                .push((item.item.item.title.clone(), full_text.map(str::to_string)));
            if item.item.item.title.contains("broken") {
                return Err(InferenceError::Provider("upstream 500".into()));
            }
            Ok(CarveOutResearch {
                deal_summary: format!("Dossier for {}.", item.item.item.title),
                potential_assets: vec!["Unit".into()],
                separation_complexity: SeparationComplexity::Medium,
                risks: Vec::new(),
                diligence_questions: Vec::new(),
                next_steps: Vec::new(),
                confidence: ResearchConfidence::Medium,
            })
        }
    }

    fn analyzed(n: u32, score: u8, flag: Option<OpportunityFlag>) -> AnalyzedItem {
        AnalyzedItem {
            item: ClassifiedItem {
                item: RawItem::new("rss", "Wire", format!("https://w.com/{n}"), format!("Story {n}"), "s", None),
                is_relevant: true,
                category: ItemCategory::MajorDeal,
                deal_type: DealType::Divestiture,
                relevance_level: RelevanceLevel::High,
                related_entity: Some(format!("Co{n}")),
                confidence: 90,
                reason: None,
                classification_error: None,
            },
            signal_score: score,
            opportunity_flags: flag.into_iter().collect::<BTreeSet<_>>(),
            why_it_matters: Some("Matters.".into()),
            used_full_text: false,
            analysis_error: None,
        }
    }

    fn executor() -> Executor {
        let limits = StageLimits {
            max_attempts: 1,
            ..StageLimits::per_minute(2, 100)
        };
        Executor::new("research", &limits, CancellationToken::new())
    }

    #[test]
    fn candidates_rank_high_before_medium_and_respect_the_cap() {
        let items = vec![
            analyzed(1, 90, Some(OpportunityFlag::CarveOutMedium)),
            analyzed(2, 80, None),
            analyzed(3, 70, Some(OpportunityFlag::CarveOutHigh)),
            analyzed(4, 60, Some(OpportunityFlag::CarveOutLow)),
            analyzed(5, 50, Some(OpportunityFlag::CarveOutMedium)),
        ];
        let curation = curate(&items, &CurationSettings::default());
        let settings = ResearchSettings {
            max_items: 2,
            ..ResearchSettings::default()
        };

        let picked: Vec<&str> = research_candidates(&items, &curation, &settings)
            .into_iter()
            .map(|a| a.item.item.title.as_str())
            .collect();
        assert_eq!(picked, vec!["Story 3", "Story 1"]);
    }

    #[test]
    fn items_left_out_of_the_digest_are_not_candidates() {
        let items = vec![analyzed(1, 90, Some(OpportunityFlag::CarveOutHigh))];
        let curation = CurationOutput {
            decisions: Vec::new(),
            selected: Vec::new(),
        };
        assert!(research_candidates(&items, &curation, &ResearchSettings::default()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_recorded_per_dossier() {
        let mut broken = analyzed(2, 70, Some(OpportunityFlag::CarveOutHigh));
        broken.item.item.title = "Story broken".into();
        let items = vec![analyzed(1, 90, Some(OpportunityFlag::CarveOutHigh)), broken];
        let enriched = vec![EnrichedItem {
            item: items[0].item.clone(),
            full_text: Some("Full body.".into()),
            fetch: FetchOutcome::Fetched { chars: 10 },
        }];
        let curation = curate(&items, &CurationSettings::default());
        let researcher = EchoResearcher {
            seen: Mutex::new(Vec::new()),
        };

        let out = research(
            &executor(),
            &researcher,
            &items,
            &enriched,
            &curation,
            &ResearchSettings::default(),
        )
        .await;

        assert_eq!(out.dossiers.len(), 2);
        assert_eq!(out.researched(), 1);
        assert_eq!(out.failed(), 1);
        let ok = out.research_for(items[0].id()).unwrap();
        assert_eq!(ok.deal_summary, "Dossier for Story 1.");
        assert!(out.research_for(items[1].id()).is_none());
        assert!(out.dossiers[1]
            .error
            .as_deref()
            .unwrap()
            .contains("upstream 500"));

        let seen = researcher.seen.lock().unwrap();
        assert!(seen.contains(&("Story 1".to_string(), Some("Full body.".to_string()))));
        assert!(seen.contains(&("Story broken".to_string(), None)));
    }
}
