//! Stage pipeline orchestration.
//!
//! One control task drives the stages in a fixed order. Each stage is a
//! barrier: it runs to completion (with item-level failures recorded on the
//! items), its output is checkpointed, and only then does the next stage
//! start. A resumed run loads completed stages from their checkpoints and
//! never executes them again.

mod error;
mod outputs;
mod state;
mod stats;

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use dealwire_checkpoint::{CheckpointError, CheckpointStore, RunState};
use dealwire_common::{AnalyzedItem, Config, PipelineStage};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use typed_builder::TypedBuilder;

use crate::collect::{collect_all, Collector, Freshness};
use crate::deliver::{DeliveryBackend, DeliveryStatus, NoopDelivery};
use crate::digest::{render_markdown, ArtifactLocation, ArtifactSink, Digest, DigestComposer, DigestCounts};
use crate::executor::Executor;
use crate::inference::{Analyzer, CarveOutResearcher, Classifier};
use crate::stages::{self, CurationOutput, DocumentFetcher, ResearchOutput};

pub use error::PipelineError;
pub use outputs::{
    AnalyzeOutput, ClassifyOutput, ComposeOutput, DeliverOutput, EnrichOutput, PersistOutput,
    RunOutputs,
};
pub use state::{next_stage, Flow};
pub use stats::RunSummary;

/// External collaborators of a run.
#[derive(TypedBuilder)]
pub struct PipelineDeps {
    pub store: Arc<dyn CheckpointStore>,
    #[builder(default)]
    pub collectors: Vec<Arc<dyn Collector>>,
    pub classifier: Arc<dyn Classifier>,
    pub fetcher: Arc<dyn DocumentFetcher>,
    pub analyzer: Arc<dyn Analyzer>,
    /// Carve-out research runs only when a researcher is present.
    #[builder(default, setter(strip_option))]
    pub researcher: Option<Arc<dyn CarveOutResearcher>>,
    pub artifacts: Arc<dyn ArtifactSink>,
    #[builder(default = Arc::new(NoopDelivery) as Arc<dyn DeliveryBackend>)]
    pub delivery: Arc<dyn DeliveryBackend>,
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: String,
    pub final_stage: PipelineStage,
    pub digest: Digest,
    pub artifact: Option<ArtifactLocation>,
    pub delivery: DeliveryStatus,
    pub summary: RunSummary,
}

/// Mutable bookkeeping for one `run` call.
struct RunCtx {
    state: RunState,
    outputs: RunOutputs,
    resumed: Vec<PipelineStage>,
}

pub struct Orchestrator {
    config: Arc<Config>,
    deps: PipelineDeps,
    cancel: CancellationToken,
    collect: BTreeMap<String, Executor>,
    classify: Executor,
    enrich: Executor,
    analyze: Executor,
    research: Executor,
    composer: DigestComposer,
}

impl Orchestrator {
    /// One executor per provider budget, all sharing `cancel`.
    pub fn new(config: Arc<Config>, deps: PipelineDeps, cancel: CancellationToken) -> Self {
        let collect = deps
            .collectors
            .iter()
            .map(|c| c.provider().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|provider| {
                let executor = Executor::new(format!("collect:{provider}"), &config.collect, cancel.clone());
                (provider, executor)
            })
            .collect();

        Self {
            classify: Executor::new("classify", &config.classify, cancel.clone()),
            enrich: Executor::new("enrich", &config.enrich.limits, cancel.clone()),
            analyze: Executor::new("analyze", &config.analyze, cancel.clone()),
            research: Executor::new("research", &config.research.limits, cancel.clone()),
            composer: DigestComposer::new(config.lookback_days),
            collect,
            config,
            deps,
            cancel,
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run (or resume) the pipeline for `run_id`.
    pub async fn run(&self, run_id: &str, resume: bool) -> Result<RunResult, PipelineError> {
        let state = self.open(run_id, resume).await?;

        if state.is_done() {
            info!(run_id, "Run already done, returning recorded result");
            let outputs = RunOutputs::from_state(&state)?;
            let resumed = state.stage_outputs.keys().copied().collect();
            return self.result(run_id, PipelineStage::Done, outputs, resumed);
        }

        let outputs = RunOutputs::from_state(&state)?;
        let mut ctx = RunCtx {
            state,
            outputs,
            resumed: Vec::new(),
        };
        let mut flow = Flow {
            survivors: ctx.outputs.dedup.as_ref().map(|d| d.survivors.len()),
            research_enabled: self.research_enabled(&ctx.state),
            delivery_enabled: self.config.delivery_enabled,
        };

        info!(
            run_id,
            resume,
            current_stage = %ctx.state.current_stage,
            started_at = %ctx.state.started_at,
            "Pipeline run starting"
        );

        let mut stage = next_stage(PipelineStage::Init, flow);
        while stage != PipelineStage::Done {
            match stage {
                PipelineStage::Collecting => {
                    let freshness = Freshness::new(
                        ctx.state.started_at,
                        self.config.lookback_days,
                        self.config.keep_undated,
                    );
                    let out = self
                        .step(&mut ctx, stage, move || async move {
                            Ok(collect_all(&self.collect, &self.deps.collectors, freshness).await)
                        })
                        .await?;
                    ctx.outputs.collect = Some(out);
                }
                PipelineStage::Classifying => {
                    let input = ctx.outputs.collect.as_ref().map(|c| c.items.clone());
                    let out = self
                        .step(&mut ctx, stage, move || async move {
                            let items = input.context("collection output missing")?;
                            Ok(ClassifyOutput {
                                items: stages::classify_items(
                                    &self.classify,
                                    self.deps.classifier.as_ref(),
                                    items,
                                    &self.config.tracked_entities,
                                )
                                .await,
                            })
                        })
                        .await?;
                    ctx.outputs.classify = Some(out);
                }
                PipelineStage::Deduping => {
                    let input = ctx.outputs.classify.as_ref().map(|c| c.items.clone());
                    let out = self
                        .step(&mut ctx, stage, move || async move {
                            let items = input.context("classification output missing")?;
                            Ok(stages::dedupe(&items, &self.config.trusted_domains))
                        })
                        .await?;
                    flow.survivors = Some(out.survivors.len());
                    if out.survivors.is_empty() {
                        info!(run_id, "No survivors after deduplication, composing empty digest");
                    }
                    ctx.outputs.dedup = Some(out);
                }
                PipelineStage::Enriching => {
                    let input = ctx.outputs.dedup.as_ref().map(|d| d.survivors.clone());
                    let out = self
                        .step(&mut ctx, stage, move || async move {
                            let survivors = input.context("dedup output missing")?;
                            Ok(EnrichOutput {
                                items: stages::enrich(
                                    &self.enrich,
                                    self.deps.fetcher.as_ref(),
                                    survivors,
                                    &self.config.enrich,
                                    &self.config.trusted_domains,
                                )
                                .await,
                            })
                        })
                        .await?;
                    ctx.outputs.enrich = Some(out);
                }
                PipelineStage::Analyzing => {
                    let input = ctx.outputs.enrich.as_ref().map(|e| e.items.clone());
                    let out = self
                        .step(&mut ctx, stage, move || async move {
                            let items = input.context("enrichment output missing")?;
                            Ok(AnalyzeOutput {
                                items: stages::analyze(&self.analyze, self.deps.analyzer.as_ref(), items)
                                    .await,
                            })
                        })
                        .await?;
                    ctx.outputs.analyze = Some(out);
                }
                PipelineStage::Curating => {
                    let input = ctx.outputs.analyze.as_ref().map(|a| a.items.clone());
                    let out = self
                        .step(&mut ctx, stage, move || async move {
                            let items = input.context("analysis output missing")?;
                            Ok(stages::curate(&items, &self.config.curation))
                        })
                        .await?;
                    ctx.outputs.curate = Some(out);
                }
                PipelineStage::Researching => {
                    let researcher = self.deps.researcher.clone();
                    let analyzed = ctx.outputs.analyze.as_ref().map(|a| a.items.clone());
                    let enriched = ctx.outputs.enrich.as_ref().map(|e| e.items.clone());
                    let curation = ctx.outputs.curate.clone();
                    let out = self
                        .step(&mut ctx, stage, move || async move {
                            let researcher = researcher.context("no carve-out researcher configured")?;
                            let analyzed = analyzed.context("analysis output missing")?;
                            let curation = curation.context("curation output missing")?;
                            Ok(stages::research(
                                &self.research,
                                researcher.as_ref(),
                                &analyzed,
                                &enriched.unwrap_or_default(),
                                &curation,
                                &self.config.research,
                            )
                            .await)
                        })
                        .await?;
                    ctx.outputs.research = Some(out);
                }
                PipelineStage::Composing => {
                    let digest_input = self.compose_input(&ctx);
                    let run_started = ctx.state.started_at;
                    let out = self
                        .step(&mut ctx, stage, move || async move {
                            let (analyzed, curation, research, counts) = digest_input;
                            let digest = self.composer.compose(
                                run_id,
                                run_started,
                                &analyzed,
                                &curation,
                                &research,
                                counts,
                            );
                            let markdown = render_markdown(&digest);
                            Ok(ComposeOutput { digest, markdown })
                        })
                        .await?;
                    ctx.outputs.compose = Some(out);
                }
                PipelineStage::Persisting => {
                    let input = ctx.outputs.compose.clone();
                    let out = self
                        .step(&mut ctx, stage, move || async move {
                            let composed = input.context("compose output missing")?;
                            let location = self
                                .deps
                                .artifacts
                                .persist(&composed.digest, &composed.markdown)
                                .await?;
                            Ok(PersistOutput { location })
                        })
                        .await?;
                    ctx.outputs.persist = Some(out);
                }
                PipelineStage::Delivering => {
                    let input = ctx.outputs.compose.clone();
                    let out = self
                        .step(&mut ctx, stage, move || async move {
                            let composed = input.context("compose output missing")?;
                            Ok(DeliverOutput {
                                status: self.deliver(&composed).await,
                            })
                        })
                        .await?;
                    ctx.outputs.deliver = Some(out);
                }
                PipelineStage::Init | PipelineStage::Done | PipelineStage::Failed => break,
            }
            stage = next_stage(stage, flow);
        }

        self.ensure_active(run_id, PipelineStage::Done)?;
        if let Err(e) = self.deps.store.finish(run_id).await {
            return Err(self
                .fail(run_id, PipelineStage::Done, format!("failed to finish run: {e}"))
                .await);
        }

        let result = self.result(run_id, PipelineStage::Done, ctx.outputs, ctx.resumed)?;
        info!(
            run_id,
            included = result.digest.counts.included,
            empty = result.digest.is_empty,
            delivery = result.delivery.label(),
            "Pipeline run done"
        );
        Ok(result)
    }

    async fn open(&self, run_id: &str, resume: bool) -> Result<RunState, PipelineError> {
        if resume {
            if let Some(state) = self.deps.store.load(run_id).await? {
                info!(
                    run_id,
                    status = state.status.as_str(),
                    current_stage = %state.current_stage,
                    "Resuming run"
                );
                return Ok(state);
            }
            warn!(run_id, "No checkpoint found for run, starting fresh");
        }

        match self.deps.store.begin(run_id).await {
            Ok(state) => Ok(state),
            Err(CheckpointError::AlreadyExists(id)) => Err(PipelineError::RunExists(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Execute `work` for `stage` and checkpoint it, or load the stage's
    /// recorded output if the run already got past it.
    async fn step<T, F, Fut>(&self, ctx: &mut RunCtx, stage: PipelineStage, work: F) -> Result<T, PipelineError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let run_id = ctx.state.run_id.clone();

        if ctx.state.is_complete(stage) || stage.ordinal() <= ctx.state.current_stage.ordinal() {
            let output = ctx.state.output(stage)?;
            debug!(run_id = run_id.as_str(), stage = %stage, "Stage output loaded from checkpoint");
            ctx.resumed.push(stage);
            return Ok(output);
        }

        self.ensure_active(&run_id, stage)?;
        info!(run_id = run_id.as_str(), stage = %stage, "Stage started");
        let started = Instant::now();

        let output = match work().await {
            Ok(output) => output,
            Err(e) => return Err(self.fail(&run_id, stage, format!("{e:#}")).await),
        };

        // Work abandoned mid-stage must not be recorded as complete.
        self.ensure_active(&run_id, stage)?;

        let payload = match serde_json::to_value(&output) {
            Ok(payload) => payload,
            Err(e) => return Err(self.fail(&run_id, stage, format!("failed to encode output: {e}")).await),
        };
        match self.deps.store.save(&run_id, stage, payload).await {
            Ok(state) => ctx.state = state,
            Err(e) => return Err(self.fail(&run_id, stage, format!("checkpoint save failed: {e}")).await),
        }

        info!(
            run_id = run_id.as_str(),
            stage = %stage,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Stage checkpointed"
        );
        Ok(output)
    }

    fn ensure_active(&self, run_id: &str, stage: PipelineStage) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            warn!(run_id, stage = %stage, "Run cancelled, last checkpoint kept");
            return Err(PipelineError::Cancelled {
                run_id: run_id.to_string(),
                stage,
            });
        }
        Ok(())
    }

    async fn fail(&self, run_id: &str, stage: PipelineStage, message: String) -> PipelineError {
        error!(run_id, stage = %stage, error = message.as_str(), "Stage failed");
        if let Err(e) = self.deps.store.mark_failed(run_id, stage, &message).await {
            warn!(run_id, error = %e, "Failed to record run failure");
        }
        PipelineError::StageFailed { stage, message }
    }

    /// Research needs a researcher and a run that has not already gone past
    /// the research stage without it.
    fn research_enabled(&self, state: &RunState) -> bool {
        self.config.research.enabled
            && self.deps.researcher.is_some()
            && (state.is_complete(PipelineStage::Researching)
                || state.current_stage.ordinal() < PipelineStage::Researching.ordinal())
    }

    fn compose_input(
        &self,
        ctx: &RunCtx,
    ) -> (Vec<AnalyzedItem>, CurationOutput, ResearchOutput, DigestCounts) {
        let outputs = &ctx.outputs;
        let summary = RunSummary::from_outputs(outputs, Vec::new());
        let counts = DigestCounts {
            sources: summary.sources,
            failed_sources: summary.failed_sources,
            collected: summary.collected,
            relevant: summary.relevant,
            survivors: summary.survivors,
            analyzed: summary.analyzed,
            included: 0,
            classification_errors: summary.classification_errors,
            fetch_failed: summary.fetch_failed,
            analysis_errors: summary.analysis_errors,
        };
        let analyzed = outputs
            .analyze
            .as_ref()
            .map(|a| a.items.clone())
            .unwrap_or_default();
        let curation = outputs.curate.clone().unwrap_or(CurationOutput {
            decisions: Vec::new(),
            selected: Vec::new(),
        });
        let research = outputs.research.clone().unwrap_or_default();
        (analyzed, curation, research, counts)
    }

    async fn deliver(&self, composed: &ComposeOutput) -> DeliveryStatus {
        let backend = self.deps.delivery.as_ref();
        match backend.deliver(&composed.digest, &composed.markdown).await {
            Ok(receipt) => {
                info!(backend = backend.name(), "Digest delivered");
                DeliveryStatus::Delivered { receipt }
            }
            Err(e) => {
                warn!(backend = backend.name(), error = %e, "Digest delivery failed");
                DeliveryStatus::Failed {
                    backend: backend.name().to_string(),
                    error: format!("{e:#}"),
                }
            }
        }
    }

    fn result(
        &self,
        run_id: &str,
        final_stage: PipelineStage,
        outputs: RunOutputs,
        resumed: Vec<PipelineStage>,
    ) -> Result<RunResult, PipelineError> {
        let summary = RunSummary::from_outputs(&outputs, resumed);
        let composed = outputs.compose.ok_or_else(|| {
            PipelineError::Checkpoint(CheckpointError::MissingOutput {
                run_id: run_id.to_string(),
                stage: PipelineStage::Composing,
            })
        })?;
        let delivery = outputs
            .deliver
            .map(|d| d.status)
            .unwrap_or(DeliveryStatus::Skipped);

        Ok(RunResult {
            run_id: run_id.to_string(),
            final_stage,
            digest: composed.digest,
            artifact: outputs.persist.map(|p| p.location),
            delivery,
            summary,
        })
    }
}
