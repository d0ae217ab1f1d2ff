//! Pipeline policy and definition files

use crate::core::{pipeline::Pipeline, step::PipelineStep};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Pipeline-level execution policy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Recorded for callers; steps still run one at a time
    #[serde(default)]
    pub parallel_mode: bool,

    #[serde(default)]
    pub max_parallel: usize,

    /// Fail the whole execution on the first step failure
    #[serde(default)]
    pub fail_fast: bool,

    #[serde(default)]
    pub retry_strategy: RetryStrategy,

    #[serde(default)]
    pub notification: NotificationConfig,
}

/// Backoff shape between retries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryKind {
    #[default]
    None,
    Fixed,
    Linear,
    Exponential,
}

/// Retry policy applied around each step attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryStrategy {
    #[serde(default, rename = "type")]
    pub kind: RetryKind,

    #[serde(default)]
    pub initial_delay_ms: u64,

    /// Upper bound on a single delay (0 = uncapped)
    #[serde(default)]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Retries for steps that don't set their own `retry_count`
    #[serde(default)]
    pub max_retries: u32,
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            kind: RetryKind::None,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_factor: default_backoff_factor(),
            max_retries: 0,
        }
    }
}

impl RetryStrategy {
    /// Number of retries allowed for a step after its first attempt
    pub fn retries_for(&self, step: &PipelineStep) -> u32 {
        if self.kind == RetryKind::None {
            return 0;
        }
        step.retry_count.unwrap_or(self.max_retries)
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let retry = retry.max(1);
        let initial = self.initial_delay_ms as f64;
        let ms = match self.kind {
            RetryKind::None => 0.0,
            RetryKind::Fixed => initial,
            RetryKind::Linear => initial * retry as f64,
            RetryKind::Exponential => initial * self.backoff_factor.powi(retry as i32 - 1),
        };

        let ms = if self.max_delay_ms > 0 {
            ms.min(self.max_delay_ms as f64)
        } else {
            ms
        };

        Duration::from_millis(ms.max(0.0) as u64)
    }
}

/// Which lifecycle moments reach the notification sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub on_start: bool,

    #[serde(default = "default_true")]
    pub on_complete: bool,

    #[serde(default = "default_true")]
    pub on_error: bool,

    #[serde(default)]
    pub channels: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            on_start: false,
            on_complete: true,
            on_error: true,
            channels: Vec::new(),
        }
    }
}

/// Pipeline definition as written in a YAML or JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineFile {
    /// Optional fixed id; one is generated on creation when absent
    #[serde(default)]
    pub id: Option<String>,

    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub config: PipelineConfig,

    pub steps: Vec<PipelineStep>,
}

impl PipelineFile {
    /// Load a definition file, choosing the format from its extension
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Parse a definition from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: PipelineFile = serde_yaml::from_str(yaml)?;
        file.validate()?;
        Ok(file)
    }

    /// Parse a definition from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let file: PipelineFile = serde_json::from_str(json)?;
        file.validate()?;
        Ok(file)
    }

    /// Check structural rules that don't need a handler registry
    pub fn validate(&self) -> Result<()> {
        self.to_pipeline().validate()?;
        Ok(())
    }

    /// Convert to an uncreated pipeline definition
    pub fn to_pipeline(&self) -> Pipeline {
        let mut pipeline = Pipeline::new(&self.name, self.steps.clone());
        pipeline.id = self.id.clone().unwrap_or_default();
        pipeline.description = self.description.clone();
        pipeline.config = self.config.clone();
        pipeline
    }
}
