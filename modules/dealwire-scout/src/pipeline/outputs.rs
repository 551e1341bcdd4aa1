//! Checkpoint payloads, one per work stage.

use dealwire_checkpoint::{CheckpointError, RunState};
use dealwire_common::{AnalyzedItem, ClassifiedItem, EnrichedItem, PipelineStage};
use serde::{Deserialize, Serialize};

use crate::collect::CollectOutput;
use crate::deliver::DeliveryStatus;
use crate::digest::{ArtifactLocation, Digest};
use crate::stages::{CurationOutput, DedupOutput, ResearchOutput};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifyOutput {
    pub items: Vec<ClassifiedItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichOutput {
    pub items: Vec<EnrichedItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeOutput {
    pub items: Vec<AnalyzedItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeOutput {
    pub digest: Digest,
    pub markdown: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistOutput {
    pub location: ArtifactLocation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverOutput {
    pub status: DeliveryStatus,
}

/// Outputs gathered during a run, from execution or from checkpoints.
#[derive(Debug, Clone, Default)]
pub struct RunOutputs {
    pub collect: Option<CollectOutput>,
    pub classify: Option<ClassifyOutput>,
    pub dedup: Option<DedupOutput>,
    pub enrich: Option<EnrichOutput>,
    pub analyze: Option<AnalyzeOutput>,
    pub curate: Option<CurationOutput>,
    pub research: Option<ResearchOutput>,
    pub compose: Option<ComposeOutput>,
    pub persist: Option<PersistOutput>,
    pub deliver: Option<DeliverOutput>,
}

impl RunOutputs {
    /// Decode every checkpointed output of a run.
    pub fn from_state(state: &RunState) -> Result<Self, CheckpointError> {
        fn load<T: serde::de::DeserializeOwned>(
            state: &RunState,
            stage: PipelineStage,
        ) -> Result<Option<T>, CheckpointError> {
            if state.is_complete(stage) {
                state.output(stage).map(Some)
            } else {
                Ok(None)
            }
        }

        Ok(Self {
            collect: load(state, PipelineStage::Collecting)?,
            classify: load(state, PipelineStage::Classifying)?,
            dedup: load(state, PipelineStage::Deduping)?,
            enrich: load(state, PipelineStage::Enriching)?,
            analyze: load(state, PipelineStage::Analyzing)?,
            curate: load(state, PipelineStage::Curating)?,
            research: load(state, PipelineStage::Researching)?,
            compose: load(state, PipelineStage::Composing)?,
            persist: load(state, PipelineStage::Persisting)?,
            deliver: load(state, PipelineStage::Delivering)?,
        })
    }
}
