use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use dealwire_common::{PipelineStage, RunStatus};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::CheckpointError;

/// One completed stage: `{run_id, stage_name, completed_at, payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub run_id: String,
    pub stage_name: PipelineStage,
    pub completed_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: PipelineStage,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// Everything known about a run. `current_stage` is the last stage recorded
/// complete (`Init` before the first save, `Done` once finished).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub current_stage: PipelineStage,
    pub status: RunStatus,
    pub stage_outputs: BTreeMap<PipelineStage, StageRecord>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub failure: Option<StageFailure>,
}

impl RunState {
    pub fn new(run_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            current_stage: PipelineStage::Init,
            status: RunStatus::Running,
            stage_outputs: BTreeMap::new(),
            started_at: now,
            updated_at: now,
            failure: None,
        }
    }

    pub fn is_complete(&self, stage: PipelineStage) -> bool {
        self.stage_outputs.contains_key(&stage)
    }

    pub fn is_done(&self) -> bool {
        self.status == RunStatus::Done
    }

    /// Decode a stage's checkpointed output.
    pub fn output<T: DeserializeOwned>(&self, stage: PipelineStage) -> Result<T, CheckpointError> {
        let record = self
            .stage_outputs
            .get(&stage)
            .ok_or_else(|| CheckpointError::MissingOutput {
                run_id: self.run_id.clone(),
                stage,
            })?;
        Ok(serde_json::from_value(record.payload.clone())?)
    }

    /// Reject saves that are not strictly after the last completed stage.
    pub fn check_save(&self, stage: PipelineStage) -> Result<(), CheckpointError> {
        check_order(&self.run_id, self.status, self.current_stage, stage)
    }

    pub(crate) fn apply_save(
        &mut self,
        stage: PipelineStage,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), CheckpointError> {
        self.check_save(stage)?;
        self.stage_outputs.insert(
            stage,
            StageRecord {
                run_id: self.run_id.clone(),
                stage_name: stage,
                completed_at: now,
                payload,
            },
        );
        self.current_stage = stage;
        self.status = RunStatus::Running;
        self.failure = None;
        self.updated_at = now;
        Ok(())
    }

    pub(crate) fn apply_failure(
        &mut self,
        stage: PipelineStage,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CheckpointError> {
        check_active(&self.run_id, self.status)?;
        self.status = RunStatus::Failed;
        self.failure = Some(StageFailure {
            stage,
            reason: reason.to_string(),
            failed_at: now,
        });
        self.updated_at = now;
        Ok(())
    }

    pub(crate) fn apply_finish(&mut self, now: DateTime<Utc>) -> Result<(), CheckpointError> {
        check_active(&self.run_id, self.status)?;
        self.current_stage = PipelineStage::Done;
        self.status = RunStatus::Done;
        self.failure = None;
        self.updated_at = now;
        Ok(())
    }
}

pub(crate) fn check_order(
    run_id: &str,
    status: RunStatus,
    current: PipelineStage,
    stage: PipelineStage,
) -> Result<(), CheckpointError> {
    check_active(run_id, status)?;
    if !stage.is_work() || stage.ordinal() <= current.ordinal() {
        return Err(CheckpointError::OutOfOrder {
            run_id: run_id.to_string(),
            stage,
            current,
        });
    }
    Ok(())
}

/// A finished run is an archive: nothing may change it afterwards.
pub(crate) fn check_active(run_id: &str, status: RunStatus) -> Result<(), CheckpointError> {
    if status == RunStatus::Done {
        return Err(CheckpointError::Terminal(run_id.to_string()));
    }
    Ok(())
}

/// Run ids become file names and primary keys.
pub(crate) fn validate_run_id(run_id: &str) -> Result<(), CheckpointError> {
    let valid = !run_id.is_empty()
        && run_id.len() <= 128
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !run_id.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(CheckpointError::InvalidRunId(run_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn saves_must_advance() {
        let now = Utc::now();
        let mut state = RunState::new("r1", now);
        state.apply_save(PipelineStage::Collecting, json!([]), now).unwrap();
        state.apply_save(PipelineStage::Deduping, json!([]), now).unwrap();

        let err = state
            .apply_save(PipelineStage::Classifying, json!([1]), now)
            .unwrap_err();
        assert!(matches!(err, CheckpointError::OutOfOrder { .. }));
        assert!(matches!(
            state.apply_save(PipelineStage::Deduping, json!([1]), now),
            Err(CheckpointError::OutOfOrder { .. })
        ));
        assert_eq!(state.current_stage, PipelineStage::Deduping);
        assert_eq!(state.stage_outputs[&PipelineStage::Deduping].payload, json!([]));
    }

    #[test]
    fn non_work_stages_cannot_be_saved() {
        let state = RunState::new("r1", Utc::now());
        assert!(state.check_save(PipelineStage::Done).is_err());
        assert!(state.check_save(PipelineStage::Failed).is_err());
        assert!(state.check_save(PipelineStage::Init).is_err());
    }

    #[test]
    fn save_after_failure_resumes_running() {
        let now = Utc::now();
        let mut state = RunState::new("r1", now);
        state.apply_save(PipelineStage::Collecting, json!([]), now).unwrap();
        state
            .apply_failure(PipelineStage::Classifying, "store down", now)
            .unwrap();
        assert_eq!(state.status, RunStatus::Failed);
        assert_eq!(state.current_stage, PipelineStage::Collecting);

        state.apply_save(PipelineStage::Classifying, json!([]), now).unwrap();
        assert_eq!(state.status, RunStatus::Running);
        assert!(state.failure.is_none());
    }

    #[test]
    fn finished_runs_reject_saves() {
        let now = Utc::now();
        let mut state = RunState::new("r1", now);
        state.apply_finish(now).unwrap();
        assert!(matches!(
            state.check_save(PipelineStage::Collecting),
            Err(CheckpointError::Terminal(_))
        ));
    }

    #[test]
    fn finished_runs_cannot_fail_or_finish_again() {
        let now = Utc::now();
        let mut state = RunState::new("r1", now);
        state.apply_save(PipelineStage::Collecting, json!([]), now).unwrap();
        state.apply_finish(now).unwrap();
        let archived = state.clone();

        assert!(matches!(
            state.apply_failure(PipelineStage::Delivering, "late", now),
            Err(CheckpointError::Terminal(_))
        ));
        assert!(matches!(state.apply_finish(now), Err(CheckpointError::Terminal(_))));
        assert_eq!(state, archived);
    }

    #[test]
    fn output_decodes_payload() {
        let now = Utc::now();
        let mut state = RunState::new("r1", now);
        state
            .apply_save(PipelineStage::Collecting, json!(["a", "b"]), now)
            .unwrap();
        let items: Vec<String> = state.output(PipelineStage::Collecting).unwrap();
        assert_eq!(items, vec!["a", "b"]);
        assert!(state.output::<Vec<String>>(PipelineStage::Classifying).is_err());
    }

    #[test]
    fn run_ids_are_path_safe() {
        assert!(validate_run_id("2026-10-19_abc-123").is_ok());
        assert!(validate_run_id("../etc").is_err());
        assert!(validate_run_id("").is_err());
        assert!(validate_run_id("a/b").is_err());
    }

    #[test]
    fn state_survives_json() {
        let now = Utc::now();
        let mut state = RunState::new("r1", now);
        state.apply_save(PipelineStage::Collecting, json!({"n": 1}), now).unwrap();
        let text = serde_json::to_string(&state).unwrap();
        let back: RunState = serde_json::from_str(&text).unwrap();
        assert_eq!(back, state);
    }
}
