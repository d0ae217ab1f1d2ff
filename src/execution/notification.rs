//! Notification sink and execution events

use crate::core::{EngineError, ExecutionStatus, PipelineExecution};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

/// Fire-and-forget hooks invoked at execution lifecycle moments.
///
/// Implementations must not block for long and cannot fail the execution.
pub trait NotificationSink: Send + Sync {
    fn notify_start(&self, _execution: &PipelineExecution) {}

    fn notify_completion(&self, execution_id: &str, execution: &PipelineExecution);

    fn notify_error(&self, execution_id: &str, error: &EngineError);
}

/// Default sink: writes notifications to the log
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn notify_start(&self, execution: &PipelineExecution) {
        info!(
            "Execution started: {} (pipeline {})",
            execution.id, execution.pipeline_id
        );
    }

    fn notify_completion(&self, execution_id: &str, execution: &PipelineExecution) {
        info!(
            "Execution finished: {} - {}",
            execution_id,
            execution.status.as_str()
        );
    }

    fn notify_error(&self, execution_id: &str, err: &EngineError) {
        error!("Execution error: {} - {}", execution_id, err);
    }
}

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        execution_id: String,
        pipeline_id: String,
        pipeline_name: String,
        total_steps: usize,
    },
    StepStarted {
        execution_id: String,
        step_id: String,
        index: usize,
    },
    StepRetrying {
        execution_id: String,
        step_id: String,
        attempt: u32,
        max_retries: u32,
        error: String,
    },
    StepCompleted {
        execution_id: String,
        step_id: String,
    },
    StepFailed {
        execution_id: String,
        step_id: String,
        error: String,
    },
    ExecutionSuspended {
        execution_id: String,
    },
    PipelineCompleted {
        execution_id: String,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Registered event callbacks, shared across clones
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<Mutex<Vec<EventHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event handler
    pub async fn subscribe<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.handlers.lock().await.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    pub async fn emit(&self, event: ExecutionEvent) {
        let handlers = self.handlers.lock().await;
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }
}
