use dealwire_checkpoint::CheckpointError;
use dealwire_common::PipelineStage;
use thiserror::Error;

/// Errors that escape `Orchestrator::run`. Item-level failures never do.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("run {0} already exists; use resume")]
    RunExists(String),

    #[error("run {run_id} cancelled during {stage}")]
    Cancelled { run_id: String, stage: PipelineStage },

    #[error("stage {stage} failed: {message}")]
    StageFailed { stage: PipelineStage, message: String },

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}
