//! Conditional executor - runs one of two sub-steps based on the input

use crate::core::{condition::Condition, DataMap};
use crate::handler::{
    parse_config, run_sub_step, HandlerContext, HandlerError, StepHandler, SubStep,
    WeakHandlerRegistry,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

/// Config for [`ConditionalExecutor`]
#[derive(Debug, Clone, Deserialize)]
pub struct ConditionalConfig {
    /// Expression such as `score >= 0.7`
    pub condition: String,

    #[serde(default)]
    pub true_step: Option<SubStep>,

    #[serde(default)]
    pub false_step: Option<SubStep>,
}

/// Branches to `true_step` or `false_step` using handlers from the same registry
pub struct ConditionalExecutor {
    registry: WeakHandlerRegistry,
}

impl ConditionalExecutor {
    pub fn new(registry: WeakHandlerRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl StepHandler for ConditionalExecutor {
    async fn execute(
        &self,
        ctx: &HandlerContext,
        config: &DataMap,
        input: &DataMap,
    ) -> Result<DataMap, HandlerError> {
        let config: ConditionalConfig = parse_config(config)?;
        let result = Condition::parse(&config.condition).evaluate(input);

        let (label, branch) = if result {
            ("true_step", config.true_step.as_ref())
        } else {
            ("false_step", config.false_step.as_ref())
        };

        let (executed_step, step_output) = match branch {
            Some(sub_step) => {
                let registry = self
                    .registry
                    .upgrade()
                    .ok_or_else(|| HandlerError::HandlerNotFound(sub_step.handler.clone()))?;
                info!(
                    "Condition '{}' is {} - running {} ({})",
                    config.condition, result, label, sub_step.handler
                );
                let output = run_sub_step(&registry, ctx, sub_step, input).await?;
                (label, Value::Object(output))
            }
            None => ("", Value::Null),
        };

        let mut output = DataMap::new();
        output.insert("condition_result".to_string(), Value::Bool(result));
        output.insert("executed_step".to_string(), json!(executed_step));
        output.insert("step_output".to_string(), step_output);
        output.insert("executed_at".to_string(), json!(Utc::now().to_rfc3339()));
        Ok(output)
    }

    fn validate_config(&self, config: &DataMap) -> Result<(), HandlerError> {
        let config: ConditionalConfig = parse_config(config)?;
        if config.condition.trim().is_empty() {
            return Err(HandlerError::InvalidConfig("condition is empty".to_string()));
        }
        for sub_step in [&config.true_step, &config.false_step].into_iter().flatten() {
            if sub_step.handler.is_empty() {
                return Err(HandlerError::InvalidConfig(
                    "branch step has no handler".to_string(),
                ));
            }
        }
        Ok(())
    }
}
