//! SQLite-based persistence store

use crate::core::{
    DataMap, ExecutionStatus, Pipeline, PipelineConfig, PipelineExecution, PipelineStatus,
    PipelineStep, StepExecution, StepStatus,
};
use crate::persistence::{ExecutionStats, PipelineStore};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::HashMap;
use std::path::Path;

/// SQLite pipeline store
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) a database file
    pub async fn connect(db_path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| {
                format!("Failed to open database {}", db_path.as_ref().display())
            })?;

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Private in-memory database; one connection so every query sees it
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("pipeline-engine");
        std::fs::create_dir_all(&db_dir)
            .with_context(|| format!("Failed to create {}", db_dir.display()))?;

        Self::connect(db_dir.join("pipelines.db")).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pipelines (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                steps TEXT NOT NULL,
                config TEXT NOT NULL,
                status TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                pipeline_id TEXT NOT NULL,
                status TEXT NOT NULL,
                input TEXT NOT NULL,
                output TEXT NOT NULL,
                error TEXT,
                started_at TEXT NOT NULL,
                finished_at TEXT
            );

            CREATE TABLE IF NOT EXISTS step_executions (
                execution_id TEXT NOT NULL,
                step_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                input TEXT NOT NULL,
                output TEXT NOT NULL,
                progress INTEGER NOT NULL DEFAULT 0,
                started_at TEXT,
                finished_at TEXT,
                error TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                logs TEXT NOT NULL,
                PRIMARY KEY (execution_id, step_id)
            );

            CREATE INDEX IF NOT EXISTS idx_executions_pipeline ON executions(pipeline_id);
            CREATE INDEX IF NOT EXISTS idx_executions_status ON executions(status);
            CREATE INDEX IF NOT EXISTS idx_executions_started_at ON executions(started_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize schema")?;

        Ok(())
    }

    /// Stored version of a definition (1 after the first save)
    pub async fn pipeline_version(&self, pipeline_id: &str) -> Result<Option<u32>> {
        let version: Option<i64> = sqlx::query_scalar("SELECT version FROM pipelines WHERE id = ?1")
            .bind(pipeline_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to read pipeline version")?;
        Ok(version.map(|v| v as u32))
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn pipeline_from_row(row: &SqliteRow) -> Result<Pipeline> {
        let steps: Vec<PipelineStep> = serde_json::from_str(row.try_get("steps")?)
            .context("Corrupt pipeline steps")?;
        let config: PipelineConfig = serde_json::from_str(row.try_get("config")?)
            .context("Corrupt pipeline config")?;

        Ok(Pipeline {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            steps,
            config,
            status: PipelineStatus::parse(row.try_get("status")?),
            created_at: Self::from_naive(row.try_get("created_at")?),
            updated_at: Self::from_naive(row.try_get("updated_at")?),
        })
    }

    fn step_from_row(row: &SqliteRow) -> Result<StepExecution> {
        Ok(StepExecution {
            step_id: row.try_get("step_id")?,
            name: row.try_get("name")?,
            status: StepStatus::parse(row.try_get("status")?),
            input: parse_map(row.try_get("input")?)?,
            output: parse_map(row.try_get("output")?)?,
            progress: row.try_get::<i64, _>("progress")?.clamp(0, 100) as u8,
            started_at: row
                .try_get::<Option<NaiveDateTime>, _>("started_at")?
                .map(Self::from_naive),
            finished_at: row
                .try_get::<Option<NaiveDateTime>, _>("finished_at")?
                .map(Self::from_naive),
            error: row.try_get("error")?,
            attempts: row.try_get::<i64, _>("attempts")? as u32,
            logs: serde_json::from_str(row.try_get("logs")?).context("Corrupt step logs")?,
        })
    }

    /// Rebuild an execution from its row, reading its steps on `conn`
    async fn execution_from_row(
        conn: &mut SqliteConnection,
        row: &SqliteRow,
    ) -> Result<PipelineExecution> {
        let id: String = row.try_get("id")?;
        let step_rows = sqlx::query(
            r#"
            SELECT step_id, name, status, input, output, progress, started_at, finished_at,
                   error, attempts, logs
            FROM step_executions
            WHERE execution_id = ?1
            ORDER BY position ASC
            "#,
        )
        .bind(&id)
        .fetch_all(&mut *conn)
        .await
        .context("Failed to load step executions")?;

        let steps = step_rows
            .iter()
            .map(Self::step_from_row)
            .collect::<Result<Vec<_>>>()?;

        Ok(PipelineExecution {
            id,
            pipeline_id: row.try_get("pipeline_id")?,
            status: ExecutionStatus::parse(row.try_get("status")?),
            input: parse_map(row.try_get("input")?)?,
            output: parse_map(row.try_get("output")?)?,
            steps,
            started_at: Self::from_naive(row.try_get("started_at")?),
            finished_at: row
                .try_get::<Option<NaiveDateTime>, _>("finished_at")?
                .map(Self::from_naive),
            error: row.try_get("error")?,
        })
    }
}

fn parse_map(json: &str) -> Result<DataMap> {
    serde_json::from_str(json).context("Corrupt data map")
}

const EXECUTION_COLUMNS: &str =
    "id, pipeline_id, status, input, output, error, started_at, finished_at";

#[async_trait::async_trait]
impl PipelineStore for SqliteStore {
    async fn save_pipeline(&self, pipeline: &Pipeline) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pipelines
            (id, name, description, steps, config, status, version, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                steps = excluded.steps,
                config = excluded.config,
                status = excluded.status,
                updated_at = excluded.updated_at,
                version = pipelines.version + 1
            "#,
        )
        .bind(&pipeline.id)
        .bind(&pipeline.name)
        .bind(&pipeline.description)
        .bind(serde_json::to_string(&pipeline.steps)?)
        .bind(serde_json::to_string(&pipeline.config)?)
        .bind(pipeline.status.as_str())
        .bind(Self::to_naive(pipeline.created_at))
        .bind(Self::to_naive(pipeline.updated_at))
        .execute(&self.pool)
        .await
        .context("Failed to save pipeline")?;

        Ok(())
    }

    async fn load_pipeline(&self, pipeline_id: &str) -> Result<Option<Pipeline>> {
        let row = sqlx::query("SELECT * FROM pipelines WHERE id = ?1")
            .bind(pipeline_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load pipeline")?;

        row.as_ref().map(Self::pipeline_from_row).transpose()
    }

    async fn save_execution(&self, execution: &PipelineExecution) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query(
            r#"
            INSERT INTO executions
            (id, pipeline_id, status, input, output, error, started_at, finished_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                input = excluded.input,
                output = excluded.output,
                error = excluded.error,
                finished_at = excluded.finished_at
            "#,
        )
        .bind(&execution.id)
        .bind(&execution.pipeline_id)
        .bind(execution.status.as_str())
        .bind(serde_json::to_string(&execution.input)?)
        .bind(serde_json::to_string(&execution.output)?)
        .bind(&execution.error)
        .bind(Self::to_naive(execution.started_at))
        .bind(execution.finished_at.map(Self::to_naive))
        .execute(&mut *tx)
        .await
        .context("Failed to save execution")?;

        for (position, step) in execution.steps.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO step_executions
                (execution_id, step_id, position, name, status, input, output, progress,
                 started_at, finished_at, error, attempts, logs)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                ON CONFLICT(execution_id, step_id) DO UPDATE SET
                    position = excluded.position,
                    status = excluded.status,
                    input = excluded.input,
                    output = excluded.output,
                    progress = excluded.progress,
                    started_at = excluded.started_at,
                    finished_at = excluded.finished_at,
                    error = excluded.error,
                    attempts = excluded.attempts,
                    logs = excluded.logs
                "#,
            )
            .bind(&execution.id)
            .bind(&step.step_id)
            .bind(position as i64)
            .bind(&step.name)
            .bind(step.status.as_str())
            .bind(serde_json::to_string(&step.input)?)
            .bind(serde_json::to_string(&step.output)?)
            .bind(step.progress as i64)
            .bind(step.started_at.map(Self::to_naive))
            .bind(step.finished_at.map(Self::to_naive))
            .bind(&step.error)
            .bind(step.attempts as i64)
            .bind(serde_json::to_string(&step.logs)?)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to save step {}", step.step_id))?;
        }

        tx.commit().await.context("Failed to commit execution")?;
        Ok(())
    }

    async fn load_execution(&self, execution_id: &str) -> Result<Option<PipelineExecution>> {
        // One read transaction so the steps match the execution row
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        let row = sqlx::query(&format!(
            "SELECT {} FROM executions WHERE id = ?1",
            EXECUTION_COLUMNS
        ))
        .bind(execution_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to load execution")?;

        let execution = match row {
            Some(row) => Some(Self::execution_from_row(&mut *tx, &row).await?),
            None => None,
        };
        tx.commit().await.context("Failed to commit transaction")?;
        Ok(execution)
    }

    async fn list_pipelines(&self) -> Result<Vec<Pipeline>> {
        let rows = sqlx::query("SELECT * FROM pipelines ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list pipelines")?;

        rows.iter().map(Self::pipeline_from_row).collect()
    }

    async fn list_executions(
        &self,
        pipeline_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<PipelineExecution>> {
        // SQLite treats a negative LIMIT as no limit
        let limit = limit.map_or(-1, |l| l as i64);
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM executions
            WHERE ?1 IS NULL OR pipeline_id = ?1
            ORDER BY started_at DESC
            LIMIT ?2
            "#,
            EXECUTION_COLUMNS
        ))
        .bind(pipeline_id)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await
        .context("Failed to list executions")?;

        let mut executions = Vec::with_capacity(rows.len());
        for row in &rows {
            executions.push(Self::execution_from_row(&mut *tx, row).await?);
        }
        tx.commit().await.context("Failed to commit transaction")?;
        Ok(executions)
    }

    async fn delete_pipeline(&self, pipeline_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query(
            r#"
            DELETE FROM step_executions
            WHERE execution_id IN (SELECT id FROM executions WHERE pipeline_id = ?1)
            "#,
        )
        .bind(pipeline_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM executions WHERE pipeline_id = ?1")
            .bind(pipeline_id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM pipelines WHERE id = ?1")
            .bind(pipeline_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await.context("Failed to delete pipeline")?;
        Ok(deleted > 0)
    }

    async fn execution_stats(&self, pipeline_id: Option<&str>) -> Result<ExecutionStats> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS total
            FROM executions
            WHERE ?1 IS NULL OR pipeline_id = ?1
            GROUP BY status
            "#,
        )
        .bind(pipeline_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to count executions")?;

        let mut by_status = HashMap::new();
        for row in &rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("total")?;
            by_status.insert(status, count as u64);
        }

        let avg_duration_ms: Option<f64> = sqlx::query_scalar(
            r#"
            SELECT AVG((julianday(finished_at) - julianday(started_at)) * 86400000.0)
            FROM executions
            WHERE (?1 IS NULL OR pipeline_id = ?1)
              AND status = 'completed' AND finished_at IS NOT NULL
            "#,
        )
        .bind(pipeline_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to average execution durations")?;

        Ok(ExecutionStats {
            total: by_status.values().sum(),
            by_status,
            avg_duration_ms,
        })
    }

    async fn cleanup_old_executions(&self, max_age: Duration) -> Result<u64> {
        let cutoff = Self::to_naive(Utc::now() - max_age);
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let terminal = "status IN ('completed', 'failed', 'cancelled') AND started_at < ?1";
        sqlx::query(&format!(
            "DELETE FROM step_executions WHERE execution_id IN (SELECT id FROM executions WHERE {})",
            terminal
        ))
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;
        let removed = sqlx::query(&format!("DELETE FROM executions WHERE {}", terminal))
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await.context("Failed to clean up executions")?;
        Ok(removed)
    }
}
