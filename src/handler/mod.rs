//! Step handlers: the contract, the registry, and the built-in handlers

pub mod builtin;
pub mod conditional;
pub mod error;
pub mod parallel;
pub mod registry;

use crate::core::DataMap;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub use builtin::{EmitHandler, FnHandler};
pub use conditional::{ConditionalConfig, ConditionalExecutor};
pub use error::HandlerError;
pub use parallel::{ParallelConfig, ParallelExecutor};
pub use registry::{
    HandlerRegistry, WeakHandlerRegistry, CONDITIONAL_HANDLER, EMIT_HANDLER, PARALLEL_HANDLER,
};

/// Trait for step execution - implemented by every pluggable unit of work
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Run the step against its config and the execution input
    async fn execute(
        &self,
        ctx: &HandlerContext,
        config: &DataMap,
        input: &DataMap,
    ) -> Result<DataMap, HandlerError>;

    /// Check a step's config when a pipeline using this handler is created
    fn validate_config(&self, _config: &DataMap) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Per-invocation context handed to a handler
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub execution_id: String,
    pub step_id: String,
    cancel: CancellationToken,
}

impl HandlerContext {
    pub fn new(
        execution_id: impl Into<String>,
        step_id: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            step_id: step_id.into(),
            cancel,
        }
    }

    /// Context not tied to any execution (tests, ad-hoc calls)
    pub fn detached(step_id: impl Into<String>) -> Self {
        Self::new(String::new(), step_id, CancellationToken::new())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the owning execution is cancelled
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Context for a nested sub-step of a composite handler
    pub fn child(&self, step_id: impl Into<String>) -> Self {
        Self::new(self.execution_id.clone(), step_id, self.cancel.child_token())
    }
}

/// A nested step inside a composite handler's config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubStep {
    pub handler: String,
    #[serde(default)]
    pub config: DataMap,
}

/// Deserialize a handler's config bag into its typed form
pub fn parse_config<T: DeserializeOwned>(config: &DataMap) -> Result<T, HandlerError> {
    serde_json::from_value(Value::Object(config.clone()))
        .map_err(|e| HandlerError::InvalidConfig(e.to_string()))
}

/// Resolve a sub-step's handler and run it against the shared input
pub(crate) async fn run_sub_step(
    registry: &HandlerRegistry,
    ctx: &HandlerContext,
    sub_step: &SubStep,
    input: &DataMap,
) -> Result<DataMap, HandlerError> {
    let handler = registry
        .get(&sub_step.handler)
        .await
        .ok_or_else(|| HandlerError::HandlerNotFound(sub_step.handler.clone()))?;

    handler
        .execute(&ctx.child(sub_step.handler.clone()), &sub_step.config, input)
        .await
}
