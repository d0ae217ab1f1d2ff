//! Engine error types

use crate::handler::HandlerError;
use thiserror::Error;

/// Errors surfaced by the orchestrator and its collaborators
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Step handler not found: {0}")]
    HandlerNotFound(String),

    #[error("Handler {handler} failed: {source}")]
    HandlerExecution {
        handler: String,
        #[source]
        source: HandlerError,
    },

    #[error("Step {step} timed out after {secs} seconds")]
    Timeout { step: String, secs: u64 },

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid pipeline definition: {0}")]
    InvalidDefinition(String),

    #[error("Invalid config for handler {handler}: {message}")]
    InvalidConfig { handler: String, message: String },
}

impl EngineError {
    pub fn pipeline_not_found(id: impl Into<String>) -> Self {
        EngineError::NotFound {
            kind: "Pipeline",
            id: id.into(),
        }
    }

    pub fn execution_not_found(id: impl Into<String>) -> Self {
        EngineError::NotFound {
            kind: "Execution",
            id: id.into(),
        }
    }

    /// Whether another attempt of the same step could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::HandlerExecution { source, .. } => source.is_retryable(),
            EngineError::Timeout { .. } => true,
            _ => false,
        }
    }
}
