//! Handler error types

use thiserror::Error;

/// Error types for step handler operations
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Step failed: {0}")]
    Failed(String),

    #[error("Step handler not found: {0}")]
    HandlerNotFound(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Handler panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    /// Config, input and lookup errors won't change on another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, HandlerError::Failed(_) | HandlerError::Other(_))
    }
}
