//! Persistence layer for pipeline definitions and execution history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteStore;

use crate::core::{ExecutionStatus, Pipeline, PipelineExecution, StepStatus};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PipelineStore: Send + Sync {
    /// Insert or update a definition, bumping its version on update
    async fn save_pipeline(&self, pipeline: &Pipeline) -> Result<()>;

    async fn load_pipeline(&self, pipeline_id: &str) -> Result<Option<Pipeline>>;

    /// Insert or update an execution together with all of its step records
    async fn save_execution(&self, execution: &PipelineExecution) -> Result<()>;

    async fn load_execution(&self, execution_id: &str) -> Result<Option<PipelineExecution>>;

    /// All definitions, oldest first
    async fn list_pipelines(&self) -> Result<Vec<Pipeline>>;

    /// Executions newest first, optionally for one pipeline
    async fn list_executions(
        &self,
        pipeline_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<PipelineExecution>>;

    /// Delete a definition and its executions; false if it didn't exist
    async fn delete_pipeline(&self, pipeline_id: &str) -> Result<bool>;

    async fn execution_stats(&self, pipeline_id: Option<&str>) -> Result<ExecutionStats>;

    /// Delete terminal executions started before `now - max_age`
    async fn cleanup_old_executions(&self, max_age: Duration) -> Result<u64>;
}

/// Execution counts per status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total: u64,
    pub by_status: HashMap<String, u64>,
    /// Mean wall-clock time of completed executions
    pub avg_duration_ms: Option<f64>,
}

impl ExecutionStats {
    pub fn count(&self, status: ExecutionStatus) -> u64 {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }

    /// Aggregate already-loaded executions
    pub fn from_executions<'a>(executions: impl IntoIterator<Item = &'a PipelineExecution>) -> Self {
        let mut stats = Self::default();
        let mut durations = Vec::new();

        for execution in executions {
            stats.total += 1;
            *stats
                .by_status
                .entry(execution.status.as_str().to_string())
                .or_insert(0) += 1;
            if execution.status == ExecutionStatus::Completed {
                if let Some(ms) = execution.duration_ms() {
                    durations.push(ms as f64);
                }
            }
        }

        if !durations.is_empty() {
            stats.avg_duration_ms = Some(durations.iter().sum::<f64>() / durations.len() as f64);
        }
        stats
    }
}

/// Summary of a pipeline execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub execution_id: String,
    pub pipeline_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Progress (0.0 to 1.0)
    pub progress: f64,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub total_steps: usize,
    pub error: Option<String>,
}

impl From<&PipelineExecution> for ExecutionSummary {
    fn from(execution: &PipelineExecution) -> Self {
        Self {
            execution_id: execution.id.clone(),
            pipeline_id: execution.pipeline_id.clone(),
            status: execution.status,
            started_at: execution.started_at,
            finished_at: execution.finished_at,
            progress: execution.progress(),
            completed_steps: execution.count_steps(StepStatus::Completed),
            failed_steps: execution.count_steps(StepStatus::Failed),
            total_steps: execution.total_steps(),
            error: execution.error.clone(),
        }
    }
}

#[derive(Default)]
struct MemoryTables {
    /// Definition plus its version counter
    pipelines: HashMap<String, (Pipeline, u32)>,
    executions: HashMap<String, PipelineExecution>,
}

/// In-memory persistence (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<MemoryTables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored version of a definition (1 after the first save)
    pub async fn pipeline_version(&self, pipeline_id: &str) -> Option<u32> {
        self.tables
            .read()
            .await
            .pipelines
            .get(pipeline_id)
            .map(|(_, version)| *version)
    }
}

#[async_trait::async_trait]
impl PipelineStore for InMemoryStore {
    async fn save_pipeline(&self, pipeline: &Pipeline) -> Result<()> {
        let mut tables = self.tables.write().await;
        let version = tables
            .pipelines
            .get(&pipeline.id)
            .map_or(1, |(_, version)| version + 1);
        tables
            .pipelines
            .insert(pipeline.id.clone(), (pipeline.clone(), version));
        Ok(())
    }

    async fn load_pipeline(&self, pipeline_id: &str) -> Result<Option<Pipeline>> {
        let tables = self.tables.read().await;
        Ok(tables.pipelines.get(pipeline_id).map(|(p, _)| p.clone()))
    }

    async fn save_execution(&self, execution: &PipelineExecution) -> Result<()> {
        self.tables
            .write()
            .await
            .executions
            .insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn load_execution(&self, execution_id: &str) -> Result<Option<PipelineExecution>> {
        Ok(self.tables.read().await.executions.get(execution_id).cloned())
    }

    async fn list_pipelines(&self) -> Result<Vec<Pipeline>> {
        let tables = self.tables.read().await;
        let mut pipelines: Vec<Pipeline> =
            tables.pipelines.values().map(|(p, _)| p.clone()).collect();
        pipelines.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(pipelines)
    }

    async fn list_executions(
        &self,
        pipeline_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<PipelineExecution>> {
        let tables = self.tables.read().await;
        let mut executions: Vec<PipelineExecution> = tables
            .executions
            .values()
            .filter(|e| pipeline_id.map_or(true, |id| e.pipeline_id == id))
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        if let Some(limit) = limit {
            executions.truncate(limit);
        }
        Ok(executions)
    }

    async fn delete_pipeline(&self, pipeline_id: &str) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let existed = tables.pipelines.remove(pipeline_id).is_some();
        tables.executions.retain(|_, e| e.pipeline_id != pipeline_id);
        Ok(existed)
    }

    async fn execution_stats(&self, pipeline_id: Option<&str>) -> Result<ExecutionStats> {
        let tables = self.tables.read().await;
        Ok(ExecutionStats::from_executions(
            tables
                .executions
                .values()
                .filter(|e| pipeline_id.map_or(true, |id| e.pipeline_id == id)),
        ))
    }

    async fn cleanup_old_executions(&self, max_age: Duration) -> Result<u64> {
        let cutoff = Utc::now() - max_age;
        let mut tables = self.tables.write().await;
        let before = tables.executions.len();
        tables
            .executions
            .retain(|_, e| !(e.status.is_terminal() && e.started_at < cutoff));
        Ok((before - tables.executions.len()) as u64)
    }
}
