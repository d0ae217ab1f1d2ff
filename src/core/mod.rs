//! Core domain models for pipelines
//!
//! This module defines the fundamental data structures that represent
//! pipeline definitions, their executions, and the engine's error surface.

pub mod condition;
pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod state;
pub mod step;
pub mod templates;

pub use config::{NotificationConfig, PipelineConfig, RetryKind, RetryStrategy};
pub use context::DataMap;
pub use error::EngineError;
pub use pipeline::*;
pub use state::*;
pub use step::*;
