//! Execution state models

use crate::core::{context::DataMap, pipeline::Pipeline};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Overall execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Execution has not started
    Pending,
    /// Execution is running
    Running,
    /// All steps were processed
    Completed,
    /// A step failed under fail-fast
    Failed,
    /// Suspended at a step boundary until resumed
    Paused,
    /// Execution was cancelled
    Cancelled,
}

impl ExecutionStatus {
    /// Check if execution is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "running" => ExecutionStatus::Running,
            "completed" => ExecutionStatus::Completed,
            "failed" => ExecutionStatus::Failed,
            "paused" => ExecutionStatus::Paused,
            "cancelled" => ExecutionStatus::Cancelled,
            _ => ExecutionStatus::Pending,
        }
    }
}

/// State of a single step within an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "running" => StepStatus::Running,
            "completed" => StepStatus::Completed,
            "failed" => StepStatus::Failed,
            "skipped" => StepStatus::Skipped,
            _ => StepStatus::Pending,
        }
    }
}

/// Record of one step within an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub step_id: String,
    pub name: String,
    pub status: StepStatus,
    #[serde(default)]
    pub input: DataMap,
    #[serde(default)]
    pub output: DataMap,
    /// 0 to 100
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
    /// Handler invocations made for this step
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub logs: Vec<String>,
}

impl StepExecution {
    pub fn pending(step_id: &str, name: &str) -> Self {
        Self {
            step_id: step_id.to_string(),
            name: name.to_string(),
            status: StepStatus::Pending,
            input: DataMap::new(),
            output: DataMap::new(),
            progress: 0,
            started_at: None,
            finished_at: None,
            error: None,
            attempts: 0,
            logs: Vec::new(),
        }
    }

    /// Wall-clock duration in milliseconds, once finished
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

/// One run of a pipeline against an input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineExecution {
    pub id: String,
    pub pipeline_id: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub input: DataMap,
    /// Cumulative output of every completed step
    #[serde(default)]
    pub output: DataMap,
    pub steps: Vec<StepExecution>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl PipelineExecution {
    /// Create a running execution with one pending record per step
    pub fn start(pipeline: &Pipeline, input: DataMap) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            pipeline_id: pipeline.id.clone(),
            status: ExecutionStatus::Running,
            input,
            output: DataMap::new(),
            steps: pipeline
                .steps
                .iter()
                .map(|s| StepExecution::pending(&s.id, &s.name))
                .collect(),
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }

    pub fn count_steps(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    /// Calculate progress (0.0 to 1.0) over finished steps
    pub fn progress(&self) -> f64 {
        if self.steps.is_empty() {
            return if self.status == ExecutionStatus::Completed { 1.0 } else { 0.0 };
        }
        let finished = self.steps.iter().filter(|s| s.status.is_terminal()).count();
        finished as f64 / self.steps.len() as f64
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }

    /// Flatten step log lines into timestamped entries
    pub fn logs(&self) -> Vec<ExecutionLog> {
        self.steps
            .iter()
            .flat_map(|step| {
                let timestamp = step.started_at.unwrap_or(self.started_at);
                step.logs.iter().map(move |message| ExecutionLog {
                    execution_id: self.id.clone(),
                    step_id: step.step_id.clone(),
                    message: message.clone(),
                    timestamp,
                })
            })
            .collect()
    }
}

/// A step log line tagged with its execution and step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub execution_id: String,
    pub step_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}
