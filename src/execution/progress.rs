//! In-memory progress snapshots keyed by execution id

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Latest progress of one execution; not persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressDetail {
    pub execution_id: String,
    pub step_id: String,
    /// Overall percent complete (0 to 100)
    pub progress: u8,
    /// e.g. "step 2/3: Optimize"
    pub current_step: String,
    pub total_steps: usize,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ProgressDetail {
    /// Snapshot for step `index` (0-based) with `done` steps finished
    pub fn for_step(
        execution_id: &str,
        step_id: &str,
        step_name: &str,
        index: usize,
        done: usize,
        total: usize,
        message: String,
    ) -> Self {
        Self {
            execution_id: execution_id.to_string(),
            step_id: step_id.to_string(),
            progress: percent(done, total),
            current_step: format!("step {}/{}: {}", index + 1, total, step_name),
            total_steps: total,
            message,
            timestamp: Utc::now(),
        }
    }
}

/// Percent of `done` over `total`, clamped to 0..=100
pub fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u8
}

/// Progress table with its own lock, separate from the execution tables
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    progress: Arc<RwLock<HashMap<String, ProgressDetail>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn update(&self, detail: ProgressDetail) {
        self.progress
            .write()
            .await
            .insert(detail.execution_id.clone(), detail);
    }

    pub async fn get(&self, execution_id: &str) -> Option<ProgressDetail> {
        self.progress.read().await.get(execution_id).cloned()
    }

    pub async fn remove(&self, execution_id: &str) -> Option<ProgressDetail> {
        self.progress.write().await.remove(execution_id)
    }
}
