//! Small built-in handlers

use crate::core::DataMap;
use crate::handler::{parse_config, HandlerContext, HandlerError, StepHandler};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Config for [`EmitHandler`]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmitConfig {
    /// Bag returned as the step output
    #[serde(default)]
    pub output: DataMap,

    /// Wait this long before answering
    #[serde(default)]
    pub delay_ms: u64,

    /// Fail with this message instead of emitting
    #[serde(default)]
    pub fail: Option<String>,
}

/// Returns a configured output bag, optionally after a delay or as a failure.
///
/// Useful for wiring pipelines before their real handlers exist.
#[derive(Debug, Clone, Default)]
pub struct EmitHandler;

#[async_trait]
impl StepHandler for EmitHandler {
    async fn execute(
        &self,
        ctx: &HandlerContext,
        config: &DataMap,
        _input: &DataMap,
    ) -> Result<DataMap, HandlerError> {
        let config: EmitConfig = parse_config(config)?;

        if config.delay_ms > 0 {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(config.delay_ms)) => {}
                _ = ctx.cancelled() => return Err(HandlerError::Cancelled),
            }
        }

        if let Some(message) = config.fail {
            return Err(HandlerError::Failed(message));
        }

        debug!("Step {} emitting {} keys", ctx.step_id, config.output.len());
        Ok(config.output)
    }

    fn validate_config(&self, config: &DataMap) -> Result<(), HandlerError> {
        parse_config::<EmitConfig>(config).map(|_| ())
    }
}

/// Adapts a synchronous closure into a step handler
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&DataMap, &DataMap) -> Result<DataMap, HandlerError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> StepHandler for FnHandler<F>
where
    F: Fn(&DataMap, &DataMap) -> Result<DataMap, HandlerError> + Send + Sync,
{
    async fn execute(
        &self,
        _ctx: &HandlerContext,
        config: &DataMap,
        input: &DataMap,
    ) -> Result<DataMap, HandlerError> {
        (self.f)(config, input)
    }
}
