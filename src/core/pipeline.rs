//! Pipeline domain model

use crate::core::{config::PipelineConfig, error::EngineError, step::PipelineStep};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Lifecycle status of a pipeline definition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    #[default]
    Draft,
    Active,
    Running,
    Completed,
    Failed,
    Paused,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Draft => "draft",
            PipelineStatus::Active => "active",
            PipelineStatus::Running => "running",
            PipelineStatus::Completed => "completed",
            PipelineStatus::Failed => "failed",
            PipelineStatus::Paused => "paused",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "active" => PipelineStatus::Active,
            "running" => PipelineStatus::Running,
            "completed" => PipelineStatus::Completed,
            "failed" => PipelineStatus::Failed,
            "paused" => PipelineStatus::Paused,
            _ => PipelineStatus::Draft,
        }
    }
}

/// A pipeline definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Unique id; assigned on creation when empty
    #[serde(default)]
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Steps in execution order
    pub steps: Vec<PipelineStep>,

    #[serde(default)]
    pub config: PipelineConfig,

    #[serde(default)]
    pub status: PipelineStatus,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Pipeline {
    /// Create an uncreated definition with the default policy
    pub fn new(name: impl Into<String>, steps: Vec<PipelineStep>) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            name: name.into(),
            description: String::new(),
            steps,
            config: PipelineConfig::default(),
            status: PipelineStatus::Draft,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.config.fail_fast = fail_fast;
        self
    }

    /// Get a step by ID
    pub fn step(&self, id: &str) -> Option<&PipelineStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Check structural rules: unique step ids, and dependencies that only
    /// point at earlier steps so array order satisfies every declared edge.
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut seen: HashSet<&str> = HashSet::new();

        for step in &self.steps {
            if step.id.is_empty() {
                return Err(EngineError::InvalidDefinition(format!(
                    "Step '{}' has an empty id",
                    step.name
                )));
            }
            if step.handler.is_empty() {
                return Err(EngineError::InvalidDefinition(format!(
                    "Step '{}' has no handler",
                    step.id
                )));
            }

            for dep in &step.depends_on {
                if !seen.contains(dep.as_str()) {
                    let reason = if self.step(dep).is_some() {
                        "which is not an earlier step"
                    } else {
                        "which does not exist"
                    };
                    return Err(EngineError::InvalidDefinition(format!(
                        "Step '{}' depends on '{}' {}; dependencies must name an earlier step",
                        step.id, dep, reason
                    )));
                }
            }

            if !seen.insert(step.id.as_str()) {
                return Err(EngineError::InvalidDefinition(format!(
                    "Duplicate step ID: {}",
                    step.id
                )));
            }
        }

        Ok(())
    }
}
