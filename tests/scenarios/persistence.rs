//! Test: Persistence - executions outlive the orchestrator that ran them

use crate::helpers::*;
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Duration;
use pipeline_engine::core::context::into_map;
use pipeline_engine::persistence::ExecutionStats;
use pipeline_engine::{
    ExecutionStatus, InMemoryStore, Orchestrator, Pipeline, PipelineExecution, PipelineStep,
    PipelineStore, StepStatus,
};
use serde_json::json;
use std::sync::Arc;

fn publish_pipeline() -> Pipeline {
    Pipeline::new(
        "Publish",
        vec![
            PipelineStep::new("gen", "emit").with_config(emit_config(json!({"title": "Hello"}))),
            PipelineStep::new("score", "emit").with_config(emit_config(json!({"score": 0.9}))),
        ],
    )
    .with_fail_fast(true)
}

/// A fresh orchestrator over the same store can still answer for old runs
#[tokio::test]
async fn test_history_survives_orchestrator_restart() {
    let store = Arc::new(InMemoryStore::new());

    let first = Orchestrator::builder().store(store.clone()).build();
    let result = run_pipeline(&first, publish_pipeline(), json!({"topic": "rust"})).await;
    assert_pipeline_completed(&result);
    let pipeline_id = result.execution.pipeline_id.clone();
    drop(first);

    let second = Orchestrator::builder().store(store.clone()).build();
    assert!(second.list_pipelines().await.is_empty());

    let loaded = second.get_execution_status(&result.execution.id).await.unwrap();
    assert_eq!(loaded, result.execution);

    let pipeline = second.get_pipeline(&pipeline_id).await.unwrap();
    assert_eq!(pipeline.name, "Publish");
    assert_eq!(second.list_pipelines().await.len(), 1);

    // The reloaded definition runs again under the new orchestrator
    let rerun = second
        .execute_pipeline(&pipeline_id, Default::default())
        .await
        .unwrap();
    let rerun = wait_for_completion(&second, &rerun.id).await;
    assert_eq!(rerun.status, ExecutionStatus::Completed);

    let history = store.list_executions(Some(&pipeline_id), None).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, rerun.id);
}

/// Only the final snapshot is stored, once per execution
#[tokio::test]
async fn test_final_snapshot_is_stored() {
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = Orchestrator::builder().store(store.clone()).build();

    let mut pipeline = publish_pipeline();
    pipeline.steps[1] =
        PipelineStep::new("score", "emit").with_config(into_map(json!({"fail": "scorer down"})));
    let result = run_pipeline(&orchestrator, pipeline, json!({})).await;
    assert_pipeline_failed(&result);

    let stored = store
        .load_execution(&result.execution.id)
        .await
        .unwrap()
        .expect("execution was not saved");
    assert_eq!(stored.status, ExecutionStatus::Failed);
    assert_eq!(stored.steps[1].status, StepStatus::Failed);
    assert!(stored.finished_at.is_some());

    let stats = store.execution_stats(None).await.unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.count(ExecutionStatus::Failed), 1);
    assert_eq!(store.pipeline_version(&result.execution.pipeline_id).await, Some(1));
}

/// Deleting a pipeline removes it from memory and from the store
#[tokio::test]
async fn test_delete_reaches_the_store() {
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = Orchestrator::builder().store(store.clone()).build();
    let result = run_pipeline(&orchestrator, publish_pipeline(), json!({})).await;
    let pipeline_id = result.execution.pipeline_id;

    orchestrator.delete_pipeline(&pipeline_id).await.unwrap();

    assert!(store.load_pipeline(&pipeline_id).await.unwrap().is_none());
    assert!(orchestrator.get_pipeline(&pipeline_id).await.is_err());
    assert!(orchestrator.delete_pipeline(&pipeline_id).await.is_err());
}

/// Store that refuses every write
struct FailingStore;

#[async_trait]
impl PipelineStore for FailingStore {
    async fn save_pipeline(&self, _pipeline: &Pipeline) -> Result<()> {
        bail!("disk full")
    }

    async fn load_pipeline(&self, _pipeline_id: &str) -> Result<Option<Pipeline>> {
        Ok(None)
    }

    async fn save_execution(&self, _execution: &PipelineExecution) -> Result<()> {
        bail!("disk full")
    }

    async fn load_execution(&self, _execution_id: &str) -> Result<Option<PipelineExecution>> {
        Ok(None)
    }

    async fn list_pipelines(&self) -> Result<Vec<Pipeline>> {
        Ok(Vec::new())
    }

    async fn list_executions(
        &self,
        _pipeline_id: Option<&str>,
        _limit: Option<usize>,
    ) -> Result<Vec<PipelineExecution>> {
        Ok(Vec::new())
    }

    async fn delete_pipeline(&self, _pipeline_id: &str) -> Result<bool> {
        Ok(false)
    }

    async fn execution_stats(&self, _pipeline_id: Option<&str>) -> Result<ExecutionStats> {
        Ok(ExecutionStats::default())
    }

    async fn cleanup_old_executions(&self, _max_age: Duration) -> Result<u64> {
        Ok(0)
    }
}

/// Storage failures are reported but never change the run's outcome
#[tokio::test]
async fn test_storage_failure_does_not_abort_run() {
    let notifier = Arc::new(RecordingNotifier::default());
    let orchestrator = Orchestrator::builder()
        .store(Arc::new(FailingStore))
        .notifier(notifier.clone())
        .build();

    let result = run_pipeline(&orchestrator, publish_pipeline(), json!({})).await;

    assert_pipeline_completed(&result);
    assert_step_output(&result, "score", "score", json!(0.9));

    let errors = notifier.errors.lock().unwrap().clone();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].1.starts_with("Storage error:"), "{}", errors[0].1);
    assert_eq!(notifier.completed.lock().unwrap().len(), 1);
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use pipeline_engine::persistence::SqliteStore;

    /// A run recorded in a database file can be inspected after reopening it
    #[tokio::test]
    async fn test_sqlite_history_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("history.db");

        let (execution_id, pipeline_id) = {
            let store = Arc::new(SqliteStore::connect(&db_path).await.unwrap());
            let orchestrator = Orchestrator::builder().store(store).build();
            let result =
                run_pipeline(&orchestrator, publish_pipeline(), json!({"topic": "rust"})).await;
            assert_pipeline_completed(&result);
            (result.execution.id, result.execution.pipeline_id)
        };

        let store = Arc::new(SqliteStore::connect(&db_path).await.unwrap());
        let orchestrator = Orchestrator::builder().store(store.clone()).build();

        let loaded = orchestrator.get_execution_status(&execution_id).await.unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Completed);
        assert_eq!(loaded.pipeline_id, pipeline_id);
        assert_eq!(loaded.input["topic"], json!("rust"));
        assert_eq!(loaded.output["title"], json!("Hello"));
        let ids: Vec<&str> = loaded.steps.iter().map(|s| s.step_id.as_str()).collect();
        assert_eq!(ids, vec!["gen", "score"]);
        assert!(loaded.steps.iter().all(|s| s.attempts == 1));

        let pipeline = orchestrator.get_pipeline(&pipeline_id).await.unwrap();
        assert_eq!(pipeline.steps.len(), 2);
        assert!(pipeline.config.fail_fast);

        let stats = store.execution_stats(Some(&pipeline_id)).await.unwrap();
        assert_eq!(stats.count(ExecutionStatus::Completed), 1);
    }

    /// Saving the same execution twice leaves one row per step
    #[tokio::test]
    async fn test_sqlite_saves_are_idempotent() {
        let store = SqliteStore::in_memory().await.unwrap();
        let orchestrator = Orchestrator::new();
        let result = run_pipeline(&orchestrator, publish_pipeline(), json!({})).await;
        let pipeline = orchestrator
            .get_pipeline(&result.execution.pipeline_id)
            .await
            .unwrap();

        store.save_pipeline(&pipeline).await.unwrap();
        store.save_pipeline(&pipeline).await.unwrap();
        store.save_execution(&result.execution).await.unwrap();
        store.save_execution(&result.execution).await.unwrap();

        assert_eq!(store.pipeline_version(&pipeline.id).await.unwrap(), Some(2));
        let loaded = store
            .load_execution(&result.execution.id)
            .await
            .unwrap()
            .expect("execution missing");
        assert_eq!(loaded.steps.len(), 2);
        assert_eq!(store.list_executions(None, None).await.unwrap().len(), 1);
    }
}
