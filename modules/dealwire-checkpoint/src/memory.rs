use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use dealwire_common::PipelineStage;
use tokio::sync::Mutex;

use crate::error::CheckpointError;
use crate::state::{validate_run_id, RunState};
use crate::CheckpointStore;

/// In-process store for tests and dry runs. Not durable.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    runs: Mutex<HashMap<String, RunState>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record directly, e.g. a run interrupted mid-way.
    pub async fn insert(&self, state: RunState) {
        self.runs.lock().await.insert(state.run_id.clone(), state);
    }

    pub async fn run_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.runs.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn begin(&self, run_id: &str) -> Result<RunState, CheckpointError> {
        validate_run_id(run_id)?;
        let mut runs = self.runs.lock().await;
        if runs.contains_key(run_id) {
            return Err(CheckpointError::AlreadyExists(run_id.to_string()));
        }
        let state = RunState::new(run_id, Utc::now());
        runs.insert(run_id.to_string(), state.clone());
        Ok(state)
    }

    async fn save(
        &self,
        run_id: &str,
        stage: PipelineStage,
        payload: serde_json::Value,
    ) -> Result<RunState, CheckpointError> {
        let mut runs = self.runs.lock().await;
        let state = runs
            .get_mut(run_id)
            .ok_or_else(|| CheckpointError::NotFound(run_id.to_string()))?;
        state.apply_save(stage, payload, Utc::now())?;
        Ok(state.clone())
    }

    async fn load(&self, run_id: &str) -> Result<Option<RunState>, CheckpointError> {
        Ok(self.runs.lock().await.get(run_id).cloned())
    }

    async fn mark_failed(
        &self,
        run_id: &str,
        stage: PipelineStage,
        reason: &str,
    ) -> Result<(), CheckpointError> {
        let mut runs = self.runs.lock().await;
        let state = runs
            .get_mut(run_id)
            .ok_or_else(|| CheckpointError::NotFound(run_id.to_string()))?;
        state.apply_failure(stage, reason, Utc::now())
    }

    async fn finish(&self, run_id: &str) -> Result<RunState, CheckpointError> {
        let mut runs = self.runs.lock().await;
        let state = runs
            .get_mut(run_id)
            .ok_or_else(|| CheckpointError::NotFound(run_id.to_string()))?;
        state.apply_finish(Utc::now())?;
        Ok(state.clone())
    }
}
