//! Pipeline execution engine

pub mod engine;
pub mod executor;
pub mod notification;
pub mod progress;

pub use engine::{Orchestrator, OrchestratorBuilder};
pub use executor::{StepExecutor, StepRun};
pub use notification::{EventBus, EventHandler, ExecutionEvent, LogNotifier, NotificationSink};
pub use progress::{ProgressDetail, ProgressTracker};
