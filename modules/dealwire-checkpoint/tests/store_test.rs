//! Behavior shared by every CheckpointStore implementation.
//! Postgres cases need DATABASE_TEST_URL and are skipped otherwise.

use std::sync::Arc;

use dealwire_checkpoint::{
    CheckpointError, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore,
    PgCheckpointStore,
};
use dealwire_common::{PipelineStage, RunStatus};
use serde_json::json;
use sqlx::PgPool;

async fn exercise_lifecycle(store: &dyn CheckpointStore, run_id: &str) {
    let state = store.begin(run_id).await.unwrap();
    assert_eq!(state.current_stage, PipelineStage::Init);
    assert_eq!(state.status, RunStatus::Running);

    assert!(matches!(
        store.begin(run_id).await,
        Err(CheckpointError::AlreadyExists(_))
    ));

    store
        .save(run_id, PipelineStage::Collecting, json!(["a", "b"]))
        .await
        .unwrap();
    let state = store
        .save(run_id, PipelineStage::Classifying, json!({"n": 2}))
        .await
        .unwrap();
    assert_eq!(state.current_stage, PipelineStage::Classifying);
    assert_eq!(state.stage_outputs.len(), 2);

    // A late write from a duplicate execution must not clobber anything.
    let err = store
        .save(run_id, PipelineStage::Collecting, json!(["stale"]))
        .await
        .unwrap_err();
    assert!(matches!(err, CheckpointError::OutOfOrder { .. }));

    let loaded = store.load(run_id).await.unwrap().unwrap();
    assert_eq!(
        loaded.stage_outputs[&PipelineStage::Collecting].payload,
        json!(["a", "b"])
    );
    assert_eq!(loaded.stage_outputs[&PipelineStage::Collecting].run_id, run_id);

    store
        .mark_failed(run_id, PipelineStage::Deduping, "boom")
        .await
        .unwrap();
    let failed = store.load(run_id).await.unwrap().unwrap();
    assert_eq!(failed.status, RunStatus::Failed);
    assert_eq!(failed.current_stage, PipelineStage::Classifying);
    assert_eq!(failed.failure.as_ref().unwrap().stage, PipelineStage::Deduping);
    assert_eq!(failed.stage_outputs.len(), 2);

    store
        .save(run_id, PipelineStage::Deduping, json!([]))
        .await
        .unwrap();
    let done = store.finish(run_id).await.unwrap();
    assert_eq!(done.status, RunStatus::Done);
    assert_eq!(done.current_stage, PipelineStage::Done);
    assert_eq!(done.stage_outputs.len(), 3);

    assert!(matches!(
        store.save(run_id, PipelineStage::Enriching, json!([])).await,
        Err(CheckpointError::Terminal(_))
    ));
    assert!(matches!(
        store.mark_failed(run_id, PipelineStage::Delivering, "late").await,
        Err(CheckpointError::Terminal(_))
    ));
    assert!(matches!(
        store.finish(run_id).await,
        Err(CheckpointError::Terminal(_))
    ));
    let archived = store.load(run_id).await.unwrap().unwrap();
    assert_eq!(archived.status, RunStatus::Done);
    assert!(archived.failure.is_none());
}

async fn exercise_isolation(store: Arc<dyn CheckpointStore>, prefix: &str) {
    let mut handles = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        let run_id = format!("{prefix}-{i}");
        handles.push(tokio::spawn(async move {
            store.begin(&run_id).await.unwrap();
            for stage in PipelineStage::WORK.iter().take(3) {
                store.save(&run_id, *stage, json!({ "run": i })).await.unwrap();
            }
            run_id
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let run_id = handle.await.unwrap();
        let state = store.load(&run_id).await.unwrap().unwrap();
        assert_eq!(state.current_stage, PipelineStage::Deduping);
        for record in state.stage_outputs.values() {
            assert_eq!(record.payload, json!({ "run": i }));
        }
    }
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

#[tokio::test]
async fn memory_store_lifecycle() {
    let store = MemoryCheckpointStore::new();
    exercise_lifecycle(&store, "mem-run").await;
}

#[tokio::test]
async fn memory_store_isolates_runs() {
    exercise_isolation(Arc::new(MemoryCheckpointStore::new()), "mem").await;
}

#[tokio::test]
async fn missing_run_is_none() {
    let store = MemoryCheckpointStore::new();
    assert!(store.load("nope").await.unwrap().is_none());
    assert!(matches!(
        store.save("nope", PipelineStage::Collecting, json!([])).await,
        Err(CheckpointError::NotFound(_))
    ));
}

// ---------------------------------------------------------------------------
// File
// ---------------------------------------------------------------------------

#[tokio::test]
async fn file_store_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileCheckpointStore::open(dir.path()).await.unwrap();
    exercise_lifecycle(&store, "file-run").await;
}

#[tokio::test]
async fn file_store_isolates_runs() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileCheckpointStore::open(dir.path()).await.unwrap();
    exercise_isolation(Arc::new(store), "file").await;
}

#[tokio::test]
async fn file_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = FileCheckpointStore::open(dir.path()).await.unwrap();
        store.begin("persisted").await.unwrap();
        store
            .save("persisted", PipelineStage::Collecting, json!([1, 2, 3]))
            .await
            .unwrap();
    }

    let reopened = FileCheckpointStore::open(dir.path()).await.unwrap();
    let state = reopened.load("persisted").await.unwrap().unwrap();
    assert_eq!(state.current_stage, PipelineStage::Collecting);
    let items: Vec<u32> = state.output(PipelineStage::Collecting).unwrap();
    assert_eq!(items, vec![1, 2, 3]);

    // No temp files left behind.
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn file_store_rejects_path_like_ids() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileCheckpointStore::open(dir.path()).await.unwrap();
    assert!(matches!(
        store.begin("../escape").await,
        Err(CheckpointError::InvalidRunId(_))
    ));
}

#[tokio::test]
async fn file_store_reports_corrupt_documents() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("broken.json"), b"{not json").unwrap();
    let store = FileCheckpointStore::open(dir.path()).await.unwrap();
    assert!(matches!(
        store.load("broken").await,
        Err(CheckpointError::Corrupt(_))
    ));
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

/// Get a store with no leftover runs under `prefix`, or skip if no test DB is available.
async fn test_store(prefix: &str) -> Option<PgCheckpointStore> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;
    let store = PgCheckpointStore::new(pool.clone());
    store.migrate().await.ok()?;

    for table in ["pipeline_checkpoints", "pipeline_runs"] {
        sqlx::query(&format!("DELETE FROM {table} WHERE run_id LIKE $1"))
            .bind(format!("{prefix}%"))
            .execute(&pool)
            .await
            .ok()?;
    }

    Some(store)
}

#[tokio::test]
async fn postgres_store_lifecycle() {
    let Some(store) = test_store("pg-run").await else {
        return;
    };
    exercise_lifecycle(&store, "pg-run").await;
}

#[tokio::test]
async fn postgres_store_isolates_runs() {
    let Some(store) = test_store("pg-iso").await else {
        return;
    };
    exercise_isolation(Arc::new(store), "pg-iso").await;
}
