//! Step executor - runs one step's handler with its deadline and retry policy

use crate::{
    core::{DataMap, EngineError, PipelineStep, RetryStrategy},
    execution::notification::{EventBus, ExecutionEvent},
    handler::{HandlerContext, HandlerError, HandlerRegistry, StepHandler},
};
use std::sync::Arc;
use tokio::task::JoinError;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of running a step through every attempt it was allowed
#[derive(Debug)]
pub struct StepRun {
    pub result: Result<DataMap, EngineError>,
    /// Handler invocations made (0 when the handler was never resolved)
    pub attempts: u32,
    /// Lines to append to the step record
    pub logs: Vec<String>,
}

/// Executes a single step
#[derive(Clone)]
pub struct StepExecutor {
    registry: HandlerRegistry,
    events: EventBus,
}

impl StepExecutor {
    pub fn new(registry: HandlerRegistry, events: EventBus) -> Self {
        Self { registry, events }
    }

    /// Resolve the step's handler and run it, retrying retryable failures
    /// while the strategy allows and the execution isn't cancelled.
    pub async fn execute(
        &self,
        execution_id: &str,
        step: &PipelineStep,
        strategy: &RetryStrategy,
        input: &DataMap,
        cancel: &CancellationToken,
    ) -> StepRun {
        info!("Executing step: {} ({})", step.id, step.handler);

        let handler = match self.registry.get(&step.handler).await {
            Some(handler) => handler,
            None => {
                error!("No handler registered for step {}: {}", step.id, step.handler);
                return StepRun {
                    result: Err(EngineError::HandlerNotFound(step.handler.clone())),
                    attempts: 0,
                    logs: Vec::new(),
                };
            }
        };

        let max_retries = strategy.retries_for(step);
        let mut logs = Vec::new();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match self
                .attempt(&handler, execution_id, step, input, cancel)
                .await
            {
                Ok(output) => {
                    debug!("Step {} succeeded on attempt {}", step.id, attempt);
                    return StepRun {
                        result: Ok(output),
                        attempts: attempt,
                        logs,
                    };
                }
                Err(err) => err,
            };

            let retries_used = attempt - 1;
            if retries_used >= max_retries || !err.is_retryable() || cancel.is_cancelled() {
                return StepRun {
                    result: Err(err),
                    attempts: attempt,
                    logs,
                };
            }

            let delay = strategy.delay_for(attempt);
            warn!(
                "Step {} attempt {} failed: {} (retry {}/{} in {}ms)",
                step.id,
                attempt,
                err,
                attempt,
                max_retries,
                delay.as_millis()
            );
            logs.push(format!(
                "attempt {} failed: {}; retrying in {}ms",
                attempt,
                err,
                delay.as_millis()
            ));
            self.events
                .emit(ExecutionEvent::StepRetrying {
                    execution_id: execution_id.to_string(),
                    step_id: step.id.clone(),
                    attempt: attempt + 1,
                    max_retries,
                    error: err.to_string(),
                })
                .await;

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return StepRun {
                        result: Err(err),
                        attempts: attempt,
                        logs,
                    };
                }
            }
        }
    }

    /// One handler invocation under the step deadline.
    ///
    /// The handler runs in its own task so a panic fails the attempt
    /// instead of the whole execution.
    async fn attempt(
        &self,
        handler: &Arc<dyn StepHandler>,
        execution_id: &str,
        step: &PipelineStep,
        input: &DataMap,
        cancel: &CancellationToken,
    ) -> Result<DataMap, EngineError> {
        let ctx = HandlerContext::new(execution_id, &step.id, cancel.child_token());
        let token = ctx.cancellation_token().clone();
        let secs = step.effective_timeout_secs();

        let task = {
            let handler = handler.clone();
            let config = step.config.clone();
            let input = input.clone();
            tokio::spawn(async move { handler.execute(&ctx, &config, &input).await })
        };
        let abort = task.abort_handle();

        let source = match timeout(step.timeout(), task).await {
            Ok(Ok(Ok(output))) => return Ok(output),
            Ok(Ok(Err(source))) => source,
            Ok(Err(joined)) => join_failure(joined),
            Err(_) => {
                error!("Timeout for step {} after {}s", step.id, secs);
                // Anything the handler spawned should stop too
                token.cancel();
                abort.abort();
                return Err(EngineError::Timeout {
                    step: step.id.clone(),
                    secs,
                });
            }
        };

        error!("Handler error for step {}: {}", step.id, source);
        Err(EngineError::HandlerExecution {
            handler: step.handler.clone(),
            source,
        })
    }
}

/// Map a handler task that didn't return into a handler error
fn join_failure(joined: JoinError) -> HandlerError {
    if !joined.is_panic() {
        return HandlerError::Cancelled;
    }

    let payload = joined.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    HandlerError::Panicked(message)
}
