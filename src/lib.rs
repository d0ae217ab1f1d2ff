//! pipeline-engine - runs pluggable step handlers as persisted pipeline executions

pub mod cli;
pub mod core;
pub mod execution;
pub mod handler;
pub mod persistence;

// Re-export commonly used types
pub use core::{
    DataMap, EngineError, ExecutionStatus, Pipeline, PipelineConfig, PipelineExecution,
    PipelineStep, StepExecution, StepStatus,
};
pub use execution::{ExecutionEvent, NotificationSink, Orchestrator, ProgressDetail};
pub use handler::{HandlerContext, HandlerError, HandlerRegistry, StepHandler};
pub use persistence::{InMemoryStore, PipelineStore};
