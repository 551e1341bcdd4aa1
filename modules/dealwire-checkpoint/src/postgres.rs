use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dealwire_common::{PipelineStage, RunStatus};
use sqlx::PgPool;

use crate::error::CheckpointError;
use crate::state::{check_active, check_order, validate_run_id, RunState, StageFailure, StageRecord};
use crate::CheckpointStore;

/// Postgres-backed store. The run row is locked (`FOR UPDATE`) for the
/// duration of each write, which serializes writers of the same run while
/// leaving other runs untouched.
#[derive(Clone)]
pub struct PgCheckpointStore {
    pool: PgPool,
}

type RunRow = (
    String,
    String,
    String,
    Option<serde_json::Value>,
    DateTime<Utc>,
    DateTime<Utc>,
);

impl PgCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, CheckpointError> {
        let pool = PgPool::connect(database_url).await?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Create the checkpoint tables if they do not exist.
    pub async fn migrate(&self) -> Result<(), CheckpointError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pipeline_runs (
                run_id        TEXT         PRIMARY KEY,
                current_stage TEXT         NOT NULL,
                status        TEXT         NOT NULL,
                failure       JSONB,
                started_at    TIMESTAMPTZ  NOT NULL,
                updated_at    TIMESTAMPTZ  NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pipeline_checkpoints (
                run_id        TEXT         NOT NULL REFERENCES pipeline_runs(run_id),
                stage_name    TEXT         NOT NULL,
                stage_ordinal SMALLINT     NOT NULL,
                completed_at  TIMESTAMPTZ  NOT NULL,
                payload       JSONB        NOT NULL,
                PRIMARY KEY (run_id, stage_name)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_status(
        &self,
        run_id: &str,
        status: RunStatus,
        current_stage: Option<PipelineStage>,
        failure: Option<serde_json::Value>,
    ) -> Result<(), CheckpointError> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_scalar::<_, String>(
            "SELECT status FROM pipeline_runs WHERE run_id = $1 FOR UPDATE",
        )
        .bind(run_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| CheckpointError::NotFound(run_id.to_string()))?;
        check_active(run_id, parse_status(&current)?)?;

        sqlx::query(
            r#"
            UPDATE pipeline_runs
            SET status = $2,
                current_stage = COALESCE($3, current_stage),
                failure = $4,
                updated_at = now()
            WHERE run_id = $1
            "#,
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(current_stage.map(|s| s.as_str()))
        .bind(failure)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn begin(&self, run_id: &str) -> Result<RunState, CheckpointError> {
        validate_run_id(run_id)?;
        let state = RunState::new(run_id, Utc::now());
        let inserted = sqlx::query(
            r#"
            INSERT INTO pipeline_runs (run_id, current_stage, status, failure, started_at, updated_at)
            VALUES ($1, $2, $3, NULL, $4, $4)
            ON CONFLICT (run_id) DO NOTHING
            "#,
        )
        .bind(run_id)
        .bind(state.current_stage.as_str())
        .bind(state.status.as_str())
        .bind(state.started_at)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(CheckpointError::AlreadyExists(run_id.to_string()));
        }
        Ok(state)
    }

    async fn save(
        &self,
        run_id: &str,
        stage: PipelineStage,
        payload: serde_json::Value,
    ) -> Result<RunState, CheckpointError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, (String, String)>(
            "SELECT current_stage, status FROM pipeline_runs WHERE run_id = $1 FOR UPDATE",
        )
        .bind(run_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| CheckpointError::NotFound(run_id.to_string()))?;

        let current = parse_stage(&row.0)?;
        let status = parse_status(&row.1)?;
        check_order(run_id, status, current, stage)?;

        sqlx::query(
            r#"
            INSERT INTO pipeline_checkpoints (run_id, stage_name, stage_ordinal, completed_at, payload)
            VALUES ($1, $2, $3, now(), $4)
            ON CONFLICT (run_id, stage_name)
            DO UPDATE SET stage_ordinal = EXCLUDED.stage_ordinal,
                          completed_at = EXCLUDED.completed_at,
                          payload = EXCLUDED.payload
            "#,
        )
        .bind(run_id)
        .bind(stage.as_str())
        .bind(stage.ordinal() as i16)
        .bind(&payload)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE pipeline_runs
            SET current_stage = $2, status = 'running', failure = NULL, updated_at = now()
            WHERE run_id = $1
            "#,
        )
        .bind(run_id)
        .bind(stage.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.load(run_id)
            .await?
            .ok_or_else(|| CheckpointError::NotFound(run_id.to_string()))
    }

    async fn load(&self, run_id: &str) -> Result<Option<RunState>, CheckpointError> {
        let Some(run) = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT run_id, current_stage, status, failure, started_at, updated_at
            FROM pipeline_runs
            WHERE run_id = $1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let rows = sqlx::query_as::<_, (String, DateTime<Utc>, serde_json::Value)>(
            r#"
            SELECT stage_name, completed_at, payload
            FROM pipeline_checkpoints
            WHERE run_id = $1
            ORDER BY stage_ordinal ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        let mut stage_outputs = BTreeMap::new();
        for (stage_name, completed_at, payload) in rows {
            let stage = parse_stage(&stage_name)?;
            stage_outputs.insert(
                stage,
                StageRecord {
                    run_id: run_id.to_string(),
                    stage_name: stage,
                    completed_at,
                    payload,
                },
            );
        }

        let (run_id, current_stage, status, failure, started_at, updated_at) = run;
        let failure = failure
            .map(serde_json::from_value::<StageFailure>)
            .transpose()?;

        Ok(Some(RunState {
            run_id,
            current_stage: parse_stage(&current_stage)?,
            status: parse_status(&status)?,
            stage_outputs,
            started_at,
            updated_at,
            failure,
        }))
    }

    async fn mark_failed(
        &self,
        run_id: &str,
        stage: PipelineStage,
        reason: &str,
    ) -> Result<(), CheckpointError> {
        let failure = StageFailure {
            stage,
            reason: reason.to_string(),
            failed_at: Utc::now(),
        };
        self.set_status(
            run_id,
            RunStatus::Failed,
            None,
            Some(serde_json::to_value(&failure)?),
        )
        .await
    }

    async fn finish(&self, run_id: &str) -> Result<RunState, CheckpointError> {
        self.set_status(run_id, RunStatus::Done, Some(PipelineStage::Done), None)
            .await?;
        self.load(run_id)
            .await?
            .ok_or_else(|| CheckpointError::NotFound(run_id.to_string()))
    }
}

fn parse_stage(raw: &str) -> Result<PipelineStage, CheckpointError> {
    raw.parse().map_err(CheckpointError::Corrupt)
}

fn parse_status(raw: &str) -> Result<RunStatus, CheckpointError> {
    raw.parse().map_err(CheckpointError::Corrupt)
}
