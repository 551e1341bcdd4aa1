use dealwire_common::{CurationReason, FetchOutcome, PipelineStage};
use serde::{Deserialize, Serialize};

use super::outputs::RunOutputs;

/// Per-stage counts for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub sources: usize,
    pub failed_sources: usize,
    pub collected: usize,
    pub dropped_stale: usize,
    pub dropped_duplicates: usize,
    pub classified: usize,
    pub relevant: usize,
    pub classification_errors: usize,
    pub duplicate_groups: usize,
    pub superseded: usize,
    pub survivors: usize,
    pub fetched: usize,
    pub fetch_failed: usize,
    pub not_selected: usize,
    pub analyzed: usize,
    pub analysis_errors: usize,
    pub selected: usize,
    pub flag_overrides: usize,
    pub below_threshold: usize,
    pub capped: usize,
    pub researched: usize,
    pub research_failed: usize,
    pub delivery: Option<String>,
    /// Stages whose output came from a checkpoint instead of being executed.
    pub resumed_stages: Vec<PipelineStage>,
}

impl RunSummary {
    pub fn from_outputs(outputs: &RunOutputs, resumed_stages: Vec<PipelineStage>) -> Self {
        let mut s = Self {
            resumed_stages,
            ..Self::default()
        };

        if let Some(collect) = &outputs.collect {
            s.sources = collect.sources.len();
            s.failed_sources = collect.failed_sources();
            s.collected = collect.items.len();
            s.dropped_stale = collect.dropped_stale;
            s.dropped_duplicates = collect.dropped_duplicates;
        }
        if let Some(classify) = &outputs.classify {
            s.classified = classify.items.len();
            s.relevant = classify.items.iter().filter(|c| c.is_relevant).count();
            s.classification_errors = classify
                .items
                .iter()
                .filter(|c| c.classification_error.is_some())
                .count();
        }
        if let Some(dedup) = &outputs.dedup {
            s.duplicate_groups = dedup.groups.iter().filter(|g| g.member_ids.len() > 1).count();
            s.superseded = dedup.superseded();
            s.survivors = dedup.survivors.len();
        }
        if let Some(enrich) = &outputs.enrich {
            for item in &enrich.items {
                match item.fetch {
                    FetchOutcome::Fetched { .. } => s.fetched += 1,
                    FetchOutcome::Failed { .. } => s.fetch_failed += 1,
                    FetchOutcome::NotSelected => s.not_selected += 1,
                }
            }
        }
        if let Some(analyze) = &outputs.analyze {
            s.analyzed = analyze.items.len();
            s.analysis_errors = analyze
                .items
                .iter()
                .filter(|a| a.analysis_error.is_some())
                .count();
        }
        if let Some(curate) = &outputs.curate {
            s.selected = curate.count(CurationReason::Selected);
            s.flag_overrides = curate.count(CurationReason::FlagOverride);
            s.below_threshold = curate.count(CurationReason::ScoreThreshold);
            s.capped = curate.count(CurationReason::CapExceeded);
        }
        if let Some(research) = &outputs.research {
            s.researched = research.researched();
            s.research_failed = research.failed();
        }
        s.delivery = outputs
            .deliver
            .as_ref()
            .map(|d| d.status.label().to_string());
        s
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Digest Run Complete ===")?;
        writeln!(f, "Sources:            {} ({} failed)", self.sources, self.failed_sources)?;
        writeln!(f, "Items collected:    {}", self.collected)?;
        writeln!(f, "  stale dropped:    {}", self.dropped_stale)?;
        writeln!(f, "  repeats dropped:  {}", self.dropped_duplicates)?;
        writeln!(f, "Classified:         {}", self.classified)?;
        writeln!(f, "  relevant:         {}", self.relevant)?;
        writeln!(f, "  errors:           {}", self.classification_errors)?;
        writeln!(f, "Duplicate groups:   {}", self.duplicate_groups)?;
        writeln!(f, "  superseded:       {}", self.superseded)?;
        writeln!(f, "Survivors:          {}", self.survivors)?;
        writeln!(f, "Full text fetched:  {}", self.fetched)?;
        writeln!(f, "  failed:           {}", self.fetch_failed)?;
        writeln!(f, "  not selected:     {}", self.not_selected)?;
        writeln!(f, "Analyzed:           {}", self.analyzed)?;
        writeln!(f, "  errors:           {}", self.analysis_errors)?;
        writeln!(f, "\nCuration:")?;
        writeln!(f, "  Selected:        {}", self.selected)?;
        writeln!(f, "  Flag override:   {}", self.flag_overrides)?;
        writeln!(f, "  Below threshold: {}", self.below_threshold)?;
        writeln!(f, "  Capped:          {}", self.capped)?;
        writeln!(
            f,
            "Carve-out research: {} ({} failed)",
            self.researched, self.research_failed
        )?;
        writeln!(
            f,
            "\nDelivery:           {}",
            self.delivery.as_deref().unwrap_or("not attempted")
        )?;
        if !self.resumed_stages.is_empty() {
            let stages: Vec<&str> = self.resumed_stages.iter().map(|s| s.as_str()).collect();
            writeln!(f, "Resumed from checkpoint: {}", stages.join(", "))?;
        }
        Ok(())
    }
}
