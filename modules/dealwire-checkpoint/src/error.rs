use dealwire_common::PipelineStage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("run {0} not found")]
    NotFound(String),

    #[error("run {0} already exists")]
    AlreadyExists(String),

    #[error("invalid run id {0:?}")]
    InvalidRunId(String),

    #[error("run {run_id}: cannot save {stage} after {current}")]
    OutOfOrder {
        run_id: String,
        stage: PipelineStage,
        current: PipelineStage,
    },

    #[error("run {0} is already done")]
    Terminal(String),

    #[error("run {run_id} has no output for {stage}")]
    MissingOutput {
        run_id: String,
        stage: PipelineStage,
    },

    #[error("corrupt checkpoint: {0}")]
    Corrupt(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
