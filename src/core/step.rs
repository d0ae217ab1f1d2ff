//! Step domain model

use crate::core::context::DataMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeout applied to steps that leave `timeout_secs` at zero
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 300;

/// A single step in a pipeline definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStep {
    /// Unique step identifier
    pub id: String,

    /// Human-readable step name
    #[serde(default)]
    pub name: String,

    /// Informational tag such as `content_generation` or `quality_scoring`
    #[serde(default, rename = "type")]
    pub step_type: String,

    /// Registry name of the handler that runs this step
    pub handler: String,

    /// Handler-specific configuration
    #[serde(default)]
    pub config: DataMap,

    /// Ids of earlier steps this one relies on
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Retries after the first attempt (falls back to the pipeline strategy)
    #[serde(default)]
    pub retry_count: Option<u32>,

    /// Per-attempt deadline in seconds
    #[serde(default)]
    pub timeout_secs: u64,
}

impl PipelineStep {
    pub fn new(id: impl Into<String>, handler: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            step_type: String::new(),
            handler: handler.into(),
            config: DataMap::new(),
            depends_on: Vec::new(),
            retry_count: None,
            timeout_secs: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_type(mut self, step_type: impl Into<String>) -> Self {
        self.step_type = step_type.into();
        self
    }

    pub fn with_config(mut self, config: DataMap) -> Self {
        self.config = config;
        self
    }

    pub fn with_dependencies(mut self, depends_on: &[&str]) -> Self {
        self.depends_on = depends_on.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Deadline applied to each attempt of this step
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.effective_timeout_secs())
    }

    pub fn effective_timeout_secs(&self) -> u64 {
        if self.timeout_secs == 0 {
            DEFAULT_STEP_TIMEOUT_SECS
        } else {
            self.timeout_secs
        }
    }
}
