//! Parallel executor - fans sub-steps out under a concurrency cap

use crate::core::DataMap;
use crate::handler::{
    parse_config, run_sub_step, HandlerContext, HandlerError, StepHandler, SubStep,
    WeakHandlerRegistry,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Concurrency cap used when `max_parallel` is absent or zero
pub const DEFAULT_MAX_PARALLEL: usize = 5;

/// Config for [`ParallelExecutor`]
#[derive(Debug, Clone, Deserialize)]
pub struct ParallelConfig {
    pub steps: Vec<SubStep>,

    #[serde(default)]
    pub max_parallel: usize,
}

impl ParallelConfig {
    pub fn effective_max_parallel(&self) -> usize {
        if self.max_parallel == 0 {
            DEFAULT_MAX_PARALLEL
        } else {
            self.max_parallel
        }
    }
}

/// Runs independent sub-steps concurrently against the same input
pub struct ParallelExecutor {
    registry: WeakHandlerRegistry,
}

impl ParallelExecutor {
    pub fn new(registry: WeakHandlerRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl StepHandler for ParallelExecutor {
    async fn execute(
        &self,
        ctx: &HandlerContext,
        config: &DataMap,
        input: &DataMap,
    ) -> Result<DataMap, HandlerError> {
        let config: ParallelConfig = parse_config(config)?;
        let registry = self
            .registry
            .upgrade()
            .ok_or_else(|| HandlerError::Failed("handler registry dropped".to_string()))?;

        let total = config.steps.len();
        let max_parallel = config.effective_max_parallel();
        debug!(
            "Step {} fanning out {} sub-steps (max {} at once)",
            ctx.step_id, total, max_parallel
        );

        let slots = Arc::new(Semaphore::new(max_parallel));
        let (tx, mut rx) = mpsc::channel(total.max(1));
        let shared_input = Arc::new(input.clone());
        let mut tasks = JoinSet::new();

        for (index, sub_step) in config.steps.into_iter().enumerate() {
            let slots = slots.clone();
            let tx = tx.clone();
            let registry = registry.clone();
            let input = shared_input.clone();
            let ctx = ctx.child(format!("{}[{}]", ctx.step_id, index));

            tasks.spawn(async move {
                let result = match slots.acquire_owned().await {
                    Ok(_slot) => run_sub_step(&registry, &ctx, &sub_step, &input).await,
                    Err(_) => Err(HandlerError::Cancelled),
                };
                let _ = tx.send((index, result)).await;
            });
        }
        drop(tx);

        let mut outcomes: Vec<Option<Result<DataMap, HandlerError>>> =
            (0..total).map(|_| None).collect();
        while let Some((index, result)) = rx.recv().await {
            outcomes[index] = Some(result);
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!("Parallel sub-step task in {} ended abnormally: {}", ctx.step_id, e);
            }
        }

        let mut results = Vec::with_capacity(total);
        let mut errors = Vec::new();
        for outcome in outcomes {
            match outcome {
                Some(Ok(output)) => results.push(Value::Object(output)),
                Some(Err(e)) => {
                    results.push(json!({ "error": e.to_string() }));
                    errors.push(Value::String(e.to_string()));
                }
                None => {
                    let message = "sub-step did not report a result".to_string();
                    results.push(json!({ "error": message }));
                    errors.push(Value::String(message));
                }
            }
        }

        let mut output = DataMap::new();
        output.insert("success_count".to_string(), json!(total - errors.len()));
        output.insert("total_count".to_string(), json!(total));
        output.insert("results".to_string(), Value::Array(results));
        output.insert("errors".to_string(), Value::Array(errors));
        output.insert("executed_at".to_string(), json!(Utc::now().to_rfc3339()));
        Ok(output)
    }

    fn validate_config(&self, config: &DataMap) -> Result<(), HandlerError> {
        let config: ParallelConfig = parse_config(config)?;
        if let Some(index) = config.steps.iter().position(|s| s.handler.is_empty()) {
            return Err(HandlerError::InvalidConfig(format!(
                "parallel step {} has no handler",
                index
            )));
        }
        Ok(())
    }
}
