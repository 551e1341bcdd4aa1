use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dealwire_common::PipelineStage;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::CheckpointError;
use crate::state::{validate_run_id, RunState};
use crate::CheckpointStore;

/// One JSON document per run under `dir`. Every write goes to a temp file
/// that is fsynced and then renamed over the previous document, so a crash
/// leaves either the old or the new state on disk.
pub struct FileCheckpointStore {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FileCheckpointStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }

    /// Single writer per run id; distinct runs never contend.
    async fn run_lock(&self, run_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(run_id.to_string())
            .or_default()
            .clone()
    }

    async fn read(&self, run_id: &str) -> Result<Option<RunState>, CheckpointError> {
        validate_run_id(run_id)?;
        match tokio::fs::read(self.path_for(run_id)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| CheckpointError::Corrupt(format!("{run_id}: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, state: &RunState) -> Result<(), CheckpointError> {
        let path = self.path_for(&state.run_id);
        let tmp = self.dir.join(format!("{}.json.tmp", state.run_id));
        let bytes = serde_json::to_vec_pretty(state)?;

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &path).await?;

        #[cfg(unix)]
        tokio::fs::File::open(&self.dir).await?.sync_all().await?;

        debug!(run_id = state.run_id.as_str(), stage = %state.current_stage, "Checkpoint written");
        Ok(())
    }

    async fn update<F>(&self, run_id: &str, apply: F) -> Result<RunState, CheckpointError>
    where
        F: FnOnce(&mut RunState) -> Result<(), CheckpointError> + Send,
    {
        let lock = self.run_lock(run_id).await;
        let _guard = lock.lock().await;
        let mut state = self
            .read(run_id)
            .await?
            .ok_or_else(|| CheckpointError::NotFound(run_id.to_string()))?;
        apply(&mut state)?;
        self.write(&state).await?;
        Ok(state)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn begin(&self, run_id: &str) -> Result<RunState, CheckpointError> {
        validate_run_id(run_id)?;
        let lock = self.run_lock(run_id).await;
        let _guard = lock.lock().await;
        if self.read(run_id).await?.is_some() {
            return Err(CheckpointError::AlreadyExists(run_id.to_string()));
        }
        let state = RunState::new(run_id, Utc::now());
        self.write(&state).await?;
        Ok(state)
    }

    async fn save(
        &self,
        run_id: &str,
        stage: PipelineStage,
        payload: serde_json::Value,
    ) -> Result<RunState, CheckpointError> {
        self.update(run_id, |state| state.apply_save(stage, payload, Utc::now()))
            .await
    }

    async fn load(&self, run_id: &str) -> Result<Option<RunState>, CheckpointError> {
        self.read(run_id).await
    }

    async fn mark_failed(
        &self,
        run_id: &str,
        stage: PipelineStage,
        reason: &str,
    ) -> Result<(), CheckpointError> {
        self.update(run_id, |state| state.apply_failure(stage, reason, Utc::now()))
            .await
            .map(|_| ())
    }

    async fn finish(&self, run_id: &str) -> Result<RunState, CheckpointError> {
        let state = self
            .update(run_id, |state| state.apply_finish(Utc::now()))
            .await?;
        // Done runs reject every further write, so the lock has nothing left to guard.
        self.locks.lock().await.remove(run_id);
        Ok(state)
    }
}
