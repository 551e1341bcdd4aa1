//! Durable per-run checkpoints for the digest pipeline.
//!
//! A run's record holds one output per completed stage. Writes for a run are
//! strictly ordered: a stage can only be saved after every stage that
//! precedes it, so a retried or duplicate execution can never overwrite a
//! later checkpoint.

mod error;
mod file;
mod memory;
mod postgres;
mod state;

use std::sync::Arc;

use async_trait::async_trait;
use dealwire_common::PipelineStage;

pub use error::CheckpointError;
pub use file::FileCheckpointStore;
pub use memory::MemoryCheckpointStore;
pub use postgres::PgCheckpointStore;
pub use state::{RunState, StageFailure, StageRecord};

/// Persistence for run state. Implementations must tolerate concurrent runs
/// under distinct ids and serialize writes within a single run.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Create a fresh record. Fails with `AlreadyExists` if the id is taken.
    async fn begin(&self, run_id: &str) -> Result<RunState, CheckpointError>;

    /// Record `stage` complete with `payload`. Durable before returning.
    async fn save(
        &self,
        run_id: &str,
        stage: PipelineStage,
        payload: serde_json::Value,
    ) -> Result<RunState, CheckpointError>;

    async fn load(&self, run_id: &str) -> Result<Option<RunState>, CheckpointError>;

    /// Flag the run failed at `stage`. Stage outputs are left untouched.
    async fn mark_failed(
        &self,
        run_id: &str,
        stage: PipelineStage,
        reason: &str,
    ) -> Result<(), CheckpointError>;

    /// Terminal transition. The record is kept as the run's archive.
    async fn finish(&self, run_id: &str) -> Result<RunState, CheckpointError>;
}

#[async_trait]
impl<S: CheckpointStore + ?Sized> CheckpointStore for Arc<S> {
    async fn begin(&self, run_id: &str) -> Result<RunState, CheckpointError> {
        (**self).begin(run_id).await
    }

    async fn save(
        &self,
        run_id: &str,
        stage: PipelineStage,
        payload: serde_json::Value,
    ) -> Result<RunState, CheckpointError> {
        (**self).save(run_id, stage, payload).await
    }

    async fn load(&self, run_id: &str) -> Result<Option<RunState>, CheckpointError> {
        (**self).load(run_id).await
    }

    async fn mark_failed(
        &self,
        run_id: &str,
        stage: PipelineStage,
        reason: &str,
    ) -> Result<(), CheckpointError> {
        (**self).mark_failed(run_id, stage, reason).await
    }

    async fn finish(&self, run_id: &str) -> Result<RunState, CheckpointError> {
        (**self).finish(run_id).await
    }
}
