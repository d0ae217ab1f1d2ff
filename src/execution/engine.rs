//! Orchestrator - owns pipeline definitions and drives their executions

use crate::{
    core::{
        context::merge_into, DataMap, EngineError, ExecutionStatus, Pipeline, PipelineExecution,
        PipelineStatus, PipelineStep, StepStatus,
    },
    core::state::ExecutionLog,
    execution::{
        executor::{StepExecutor, StepRun},
        notification::{EventBus, ExecutionEvent, LogNotifier, NotificationSink},
        progress::{ProgressDetail, ProgressTracker},
    },
    handler::{HandlerRegistry, StepHandler},
    persistence::PipelineStore,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const CANCELLED_MESSAGE: &str = "execution cancelled";

/// Finished executions kept in memory unless the builder says otherwise
pub const DEFAULT_RETAINED_EXECUTIONS: usize = 1000;

/// Live bookkeeping for one execution
struct ExecutionEntry {
    execution: PipelineExecution,
    cancel: CancellationToken,
    resume: Arc<Notify>,
    done: watch::Sender<bool>,
}

#[derive(Default)]
struct Tables {
    pipelines: HashMap<String, Pipeline>,
    executions: HashMap<String, ExecutionEntry>,
}

impl Tables {
    /// Drop the oldest finished executions beyond `retain`; returns their ids.
    ///
    /// Only entries whose run has signalled `done` are candidates, so a
    /// cancelled run that is still winding down is never evicted.
    fn evict_finished(&mut self, retain: usize) -> Vec<String> {
        let mut finished: Vec<_> = self
            .executions
            .iter()
            .filter(|(_, entry)| *entry.done.borrow())
            .map(|(id, entry)| {
                let execution = &entry.execution;
                (execution.finished_at.unwrap_or(execution.started_at), id.clone())
            })
            .collect();
        if finished.len() <= retain {
            return Vec::new();
        }

        finished.sort();
        let excess = finished.len() - retain;
        finished
            .into_iter()
            .take(excess)
            .map(|(_, id)| {
                self.executions.remove(&id);
                id
            })
            .collect()
    }
}

struct Inner {
    tables: RwLock<Tables>,
    registry: HandlerRegistry,
    executor: StepExecutor,
    progress: ProgressTracker,
    notifier: Arc<dyn NotificationSink>,
    store: Option<Arc<dyn PipelineStore>>,
    events: EventBus,
    retain_finished: usize,
}

/// Builder for [`Orchestrator`]
#[derive(Default)]
pub struct OrchestratorBuilder {
    registry: Option<HandlerRegistry>,
    notifier: Option<Arc<dyn NotificationSink>>,
    store: Option<Arc<dyn PipelineStore>>,
    retain_finished: Option<usize>,
}

impl OrchestratorBuilder {
    /// Use this registry instead of one with only the built-in handlers
    pub fn registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn store(mut self, store: Arc<dyn PipelineStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Keep at most `count` finished executions in memory.
    ///
    /// Older ones are dropped along with their progress and are then only
    /// reachable through the store.
    pub fn retain_finished(mut self, count: usize) -> Self {
        self.retain_finished = Some(count);
        self
    }

    pub fn build(self) -> Orchestrator {
        let registry = self.registry.unwrap_or_else(HandlerRegistry::with_builtins);
        let events = EventBus::new();
        Orchestrator {
            inner: Arc::new(Inner {
                tables: RwLock::new(Tables::default()),
                executor: StepExecutor::new(registry.clone(), events.clone()),
                registry,
                progress: ProgressTracker::new(),
                notifier: self.notifier.unwrap_or_else(|| Arc::new(LogNotifier)),
                store: self.store,
                events,
                retain_finished: self.retain_finished.unwrap_or(DEFAULT_RETAINED_EXECUTIONS),
            }),
        }
    }
}

/// Runs pipelines as background executions; clones share all state
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    /// In-memory orchestrator with the built-in handlers and a logging notifier
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    /// Register a step handler; a later registration under the same name wins
    pub async fn register_handler(&self, name: impl Into<String>, handler: Arc<dyn StepHandler>) {
        self.inner.registry.register(name, handler).await;
    }

    /// Add an event handler
    pub async fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(handler).await;
    }

    /// Validate and register a pipeline definition
    pub async fn create_pipeline(&self, mut pipeline: Pipeline) -> Result<Pipeline, EngineError> {
        pipeline.validate()?;
        self.validate_step_configs(&pipeline.steps).await?;

        if pipeline.id.is_empty() {
            pipeline.id = Uuid::new_v4().to_string();
        }
        let now = Utc::now();
        pipeline.status = PipelineStatus::Draft;
        pipeline.created_at = now;
        pipeline.updated_at = now;

        self.inner
            .tables
            .write()
            .await
            .pipelines
            .insert(pipeline.id.clone(), pipeline.clone());

        if let Some(store) = &self.inner.store {
            if let Err(e) = store.save_pipeline(&pipeline).await {
                warn!("Failed to persist pipeline {}: {:#}", pipeline.id, e);
            }
        }

        info!(
            "Created pipeline {} ({}) with {} steps",
            pipeline.name,
            pipeline.id,
            pipeline.steps.len()
        );
        Ok(pipeline)
    }

    /// Steps whose handler is already known must pass its config check
    async fn validate_step_configs(&self, steps: &[PipelineStep]) -> Result<(), EngineError> {
        for step in steps {
            if let Some(handler) = self.inner.registry.get(&step.handler).await {
                handler
                    .validate_config(&step.config)
                    .map_err(|e| EngineError::InvalidConfig {
                        handler: step.handler.clone(),
                        message: format!("step {}: {}", step.id, e),
                    })?;
            }
        }
        Ok(())
    }

    /// Start a run; returns the initial snapshot while steps run in the background
    pub async fn execute_pipeline(
        &self,
        pipeline_id: &str,
        input: DataMap,
    ) -> Result<PipelineExecution, EngineError> {
        self.execute_pipeline_with_cancel(pipeline_id, input, CancellationToken::new())
            .await
    }

    /// Like [`execute_pipeline`](Self::execute_pipeline); cancelling `parent`
    /// cancels the execution.
    pub async fn execute_pipeline_with_cancel(
        &self,
        pipeline_id: &str,
        input: DataMap,
        parent: CancellationToken,
    ) -> Result<PipelineExecution, EngineError> {
        let pipeline = self.get_pipeline(pipeline_id).await?;
        let execution = PipelineExecution::start(&pipeline, input);
        let cancel = parent.child_token();
        let resume = Arc::new(Notify::new());
        let (done, _) = watch::channel(false);

        self.inner.tables.write().await.executions.insert(
            execution.id.clone(),
            ExecutionEntry {
                execution: execution.clone(),
                cancel: cancel.clone(),
                resume: resume.clone(),
                done,
            },
        );

        info!(
            "Starting pipeline execution: {} ({}) - {}",
            pipeline.name, pipeline.id, execution.id
        );

        let orchestrator = self.clone();
        let execution_id = execution.id.clone();
        tokio::spawn(async move {
            orchestrator
                .run_execution(pipeline, execution_id, cancel, resume)
                .await;
        });

        Ok(execution)
    }

    /// Suspend a running execution before its next step
    pub async fn pause_pipeline(&self, execution_id: &str) -> Result<(), EngineError> {
        let mut tables = self.inner.tables.write().await;
        let entry = tables
            .executions
            .get_mut(execution_id)
            .ok_or_else(|| EngineError::execution_not_found(execution_id))?;

        if entry.execution.status != ExecutionStatus::Running {
            return Err(EngineError::InvalidState(format!(
                "cannot pause execution in status {}",
                entry.execution.status.as_str()
            )));
        }
        entry.execution.status = ExecutionStatus::Paused;
        info!("Paused execution {}", execution_id);
        Ok(())
    }

    /// Let a paused execution continue from the step it stopped before
    pub async fn resume_pipeline(&self, execution_id: &str) -> Result<(), EngineError> {
        let mut tables = self.inner.tables.write().await;
        let entry = tables
            .executions
            .get_mut(execution_id)
            .ok_or_else(|| EngineError::execution_not_found(execution_id))?;

        if entry.execution.status != ExecutionStatus::Paused {
            return Err(EngineError::InvalidState(format!(
                "cannot resume execution in status {}",
                entry.execution.status.as_str()
            )));
        }
        entry.execution.status = ExecutionStatus::Running;
        entry.resume.notify_one();
        info!("Resumed execution {}", execution_id);
        Ok(())
    }

    /// Mark an execution cancelled and signal its handlers
    pub async fn cancel_pipeline(&self, execution_id: &str) -> Result<(), EngineError> {
        let mut tables = self.inner.tables.write().await;
        let entry = tables
            .executions
            .get_mut(execution_id)
            .ok_or_else(|| EngineError::execution_not_found(execution_id))?;

        if entry.execution.status.is_terminal() {
            return Err(EngineError::InvalidState(format!(
                "cannot cancel execution in status {}",
                entry.execution.status.as_str()
            )));
        }
        entry.execution.status = ExecutionStatus::Cancelled;
        entry.execution.error = Some(CANCELLED_MESSAGE.to_string());
        entry.cancel.cancel();
        entry.resume.notify_one();
        info!("Cancelled execution {}", execution_id);
        Ok(())
    }

    /// Current snapshot; falls back to the store for executions not in memory
    pub async fn get_execution_status(
        &self,
        execution_id: &str,
    ) -> Result<PipelineExecution, EngineError> {
        if let Some(entry) = self.inner.tables.read().await.executions.get(execution_id) {
            return Ok(entry.execution.clone());
        }

        if let Some(store) = &self.inner.store {
            if let Some(execution) = store
                .load_execution(execution_id)
                .await
                .map_err(EngineError::Storage)?
            {
                return Ok(execution);
            }
        }
        Err(EngineError::execution_not_found(execution_id))
    }

    pub async fn get_execution_logs(
        &self,
        execution_id: &str,
    ) -> Result<Vec<ExecutionLog>, EngineError> {
        Ok(self.get_execution_status(execution_id).await?.logs())
    }

    /// Latest progress snapshot of an execution, if any step has started
    pub async fn get_progress(&self, execution_id: &str) -> Option<ProgressDetail> {
        self.inner.progress.get(execution_id).await
    }

    /// Pipelines registered in memory, oldest first
    pub async fn list_pipelines(&self) -> Vec<Pipeline> {
        let mut pipelines: Vec<Pipeline> = self
            .inner
            .tables
            .read()
            .await
            .pipelines
            .values()
            .cloned()
            .collect();
        pipelines.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        pipelines
    }

    /// Pipeline definition; falls back to the store and caches the result
    pub async fn get_pipeline(&self, pipeline_id: &str) -> Result<Pipeline, EngineError> {
        if let Some(pipeline) = self.inner.tables.read().await.pipelines.get(pipeline_id) {
            return Ok(pipeline.clone());
        }

        if let Some(store) = &self.inner.store {
            if let Some(pipeline) = store
                .load_pipeline(pipeline_id)
                .await
                .map_err(EngineError::Storage)?
            {
                debug!("Loaded pipeline {} from store", pipeline_id);
                self.inner
                    .tables
                    .write()
                    .await
                    .pipelines
                    .insert(pipeline.id.clone(), pipeline.clone());
                return Ok(pipeline);
            }
        }
        Err(EngineError::pipeline_not_found(pipeline_id))
    }

    /// In-memory executions, newest first
    pub async fn list_executions(&self, pipeline_id: Option<&str>) -> Vec<PipelineExecution> {
        let mut executions: Vec<PipelineExecution> = self
            .inner
            .tables
            .read()
            .await
            .executions
            .values()
            .map(|entry| &entry.execution)
            .filter(|e| pipeline_id.map_or(true, |id| e.pipeline_id == id))
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        executions
    }

    /// Remove a definition from memory and the store; running executions keep going
    pub async fn delete_pipeline(&self, pipeline_id: &str) -> Result<(), EngineError> {
        let removed = self
            .inner
            .tables
            .write()
            .await
            .pipelines
            .remove(pipeline_id)
            .is_some();

        let stored = match &self.inner.store {
            Some(store) => store
                .delete_pipeline(pipeline_id)
                .await
                .map_err(EngineError::Storage)?,
            None => false,
        };

        if !removed && !stored {
            return Err(EngineError::pipeline_not_found(pipeline_id));
        }
        info!("Deleted pipeline {}", pipeline_id);
        Ok(())
    }

    /// Wait until an execution reaches a terminal status and return it.
    ///
    /// A paused execution keeps this waiting until it is resumed or cancelled.
    pub async fn wait_for_completion(
        &self,
        execution_id: &str,
    ) -> Result<PipelineExecution, EngineError> {
        let done = self
            .inner
            .tables
            .read()
            .await
            .executions
            .get(execution_id)
            .map(|entry| entry.done.subscribe());

        if let Some(mut done) = done {
            // Errors only if the entry was evicted; the store answers then
            let _ = done.wait_for(|finished| *finished).await;
        }
        self.get_execution_status(execution_id).await
    }

    /// Background task body: one step at a time, in array order
    async fn run_execution(
        self,
        pipeline: Pipeline,
        execution_id: String,
        cancel: CancellationToken,
        resume: Arc<Notify>,
    ) {
        let total = pipeline.steps.len();
        let config = &pipeline.config;

        self.inner
            .events
            .emit(ExecutionEvent::PipelineStarted {
                execution_id: execution_id.clone(),
                pipeline_id: pipeline.id.clone(),
                pipeline_name: pipeline.name.clone(),
                total_steps: total,
            })
            .await;
        if config.notification.on_start {
            if let Ok(snapshot) = self.get_execution_status(&execution_id).await {
                self.inner.notifier.notify_start(&snapshot);
            }
        }

        let mut stopped = false;
        for (index, step) in pipeline.steps.iter().enumerate() {
            if !self.checkpoint(&execution_id, &cancel, &resume).await {
                stopped = true;
                break;
            }

            let input = self.begin_step(&execution_id, index, step).await;
            self.inner
                .progress
                .update(ProgressDetail::for_step(
                    &execution_id,
                    &step.id,
                    &step.name,
                    index,
                    index,
                    total,
                    format!("running: {}", step.name),
                ))
                .await;
            self.inner
                .events
                .emit(ExecutionEvent::StepStarted {
                    execution_id: execution_id.clone(),
                    step_id: step.id.clone(),
                    index,
                })
                .await;

            let StepRun {
                result,
                attempts,
                logs,
            } = self
                .inner
                .executor
                .execute(&execution_id, step, &config.retry_strategy, &input, &cancel)
                .await;

            match result {
                Ok(output) => {
                    self.complete_step(&execution_id, index, output, attempts, logs)
                        .await;
                    self.inner
                        .progress
                        .update(ProgressDetail::for_step(
                            &execution_id,
                            &step.id,
                            &step.name,
                            index,
                            index + 1,
                            total,
                            format!("completed: {}", step.name),
                        ))
                        .await;
                    self.inner
                        .events
                        .emit(ExecutionEvent::StepCompleted {
                            execution_id: execution_id.clone(),
                            step_id: step.id.clone(),
                        })
                        .await;
                }
                Err(err) => {
                    let message = err.to_string();
                    let escalate = config.fail_fast && !cancel.is_cancelled();
                    self.fail_step(&execution_id, index, step, &message, attempts, logs, escalate)
                        .await;
                    self.inner
                        .events
                        .emit(ExecutionEvent::StepFailed {
                            execution_id: execution_id.clone(),
                            step_id: step.id.clone(),
                            error: message,
                        })
                        .await;

                    if escalate {
                        if config.notification.on_error {
                            self.inner.notifier.notify_error(&execution_id, &err);
                        }
                        stopped = true;
                        break;
                    }
                }
            }
        }

        if !stopped {
            self.checkpoint(&execution_id, &cancel, &resume).await;
        }

        self.finish_execution(&pipeline, &execution_id).await;
    }

    /// Step-boundary check: stop when cancelled, wait while paused.
    ///
    /// Returns false when the execution must not run further steps.
    async fn checkpoint(
        &self,
        execution_id: &str,
        cancel: &CancellationToken,
        resume: &Notify,
    ) -> bool {
        loop {
            if cancel.is_cancelled() {
                self.mark_cancelled(execution_id).await;
                return false;
            }

            let status = self
                .inner
                .tables
                .read()
                .await
                .executions
                .get(execution_id)
                .map(|entry| entry.execution.status);

            match status {
                Some(ExecutionStatus::Running) => return true,
                Some(ExecutionStatus::Paused) => {
                    info!("Execution {} suspended", execution_id);
                    self.inner
                        .events
                        .emit(ExecutionEvent::ExecutionSuspended {
                            execution_id: execution_id.to_string(),
                        })
                        .await;
                    tokio::select! {
                        _ = resume.notified() => {}
                        _ = cancel.cancelled() => {}
                    }
                }
                _ => return false,
            }
        }
    }

    async fn mark_cancelled(&self, execution_id: &str) {
        let mut tables = self.inner.tables.write().await;
        if let Some(entry) = tables.executions.get_mut(execution_id) {
            let execution = &mut entry.execution;
            if !execution.status.is_terminal() {
                execution.status = ExecutionStatus::Cancelled;
                execution.error = Some(CANCELLED_MESSAGE.to_string());
            }
        }
    }

    /// Mark step `index` running and hand back the input it should see
    async fn begin_step(&self, execution_id: &str, index: usize, step: &PipelineStep) -> DataMap {
        let mut tables = self.inner.tables.write().await;
        let Some(entry) = tables.executions.get_mut(execution_id) else {
            return DataMap::new();
        };

        let input = entry.execution.input.clone();
        if let Some(record) = entry.execution.steps.get_mut(index) {
            record.status = StepStatus::Running;
            record.started_at = Some(Utc::now());
            record.input = input.clone();
        }
        debug!("Step {} running in execution {}", step.id, execution_id);
        input
    }

    async fn complete_step(
        &self,
        execution_id: &str,
        index: usize,
        output: DataMap,
        attempts: u32,
        logs: Vec<String>,
    ) {
        let mut tables = self.inner.tables.write().await;
        let Some(entry) = tables.executions.get_mut(execution_id) else {
            return;
        };

        merge_into(&mut entry.execution.output, &output);
        if let Some(record) = entry.execution.steps.get_mut(index) {
            record.status = StepStatus::Completed;
            record.progress = 100;
            record.finished_at = Some(Utc::now());
            record.attempts = attempts;
            record.logs.extend(logs);
            record.output = output;
        }
    }

    async fn fail_step(
        &self,
        execution_id: &str,
        index: usize,
        step: &PipelineStep,
        message: &str,
        attempts: u32,
        logs: Vec<String>,
        escalate: bool,
    ) {
        error!("Step {} failed in execution {}: {}", step.id, execution_id, message);

        let mut tables = self.inner.tables.write().await;
        let Some(entry) = tables.executions.get_mut(execution_id) else {
            return;
        };

        let execution = &mut entry.execution;
        if let Some(record) = execution.steps.get_mut(index) {
            record.status = StepStatus::Failed;
            record.finished_at = Some(Utc::now());
            record.error = Some(message.to_string());
            record.attempts = attempts;
            record.logs.extend(logs);
            if !escalate {
                record.logs.push(format!("error: {}", message));
            }
        }
        // A cancelled execution keeps its cancellation message
        if execution.status.is_terminal() {
            return;
        }
        execution.error = Some(format!("step {} failed: {}", step.name, message));
        if escalate {
            execution.status = ExecutionStatus::Failed;
        }
    }

    /// Close out the run: final status, persistence, notification, event
    async fn finish_execution(&self, pipeline: &Pipeline, execution_id: &str) {
        let snapshot = {
            let mut tables = self.inner.tables.write().await;
            let Some(entry) = tables.executions.get_mut(execution_id) else {
                warn!("Execution {} vanished before it finished", execution_id);
                return;
            };
            let execution = &mut entry.execution;
            if execution.status == ExecutionStatus::Running {
                execution.status = ExecutionStatus::Completed;
            }
            execution.finished_at = Some(Utc::now());
            execution.clone()
        };

        info!(
            "Pipeline execution finished: {} - {}",
            pipeline.name,
            snapshot.status.as_str()
        );

        if let Some(store) = &self.inner.store {
            if let Err(e) = store.save_execution(&snapshot).await {
                error!("Failed to persist execution {}: {:#}", execution_id, e);
                if pipeline.config.notification.on_error {
                    self.inner
                        .notifier
                        .notify_error(execution_id, &EngineError::Storage(e));
                }
            }
        }

        if pipeline.config.notification.on_complete {
            self.inner.notifier.notify_completion(execution_id, &snapshot);
        }

        self.inner
            .events
            .emit(ExecutionEvent::PipelineCompleted {
                execution_id: execution_id.to_string(),
                status: snapshot.status,
            })
            .await;

        // Receivers of `done` read the snapshot through the table
        let evicted = {
            let mut tables = self.inner.tables.write().await;
            if let Some(entry) = tables.executions.get(execution_id) {
                entry.done.send_replace(true);
            }
            tables.evict_finished(self.inner.retain_finished)
        };
        for id in &evicted {
            self.inner.progress.remove(id).await;
        }
        if !evicted.is_empty() {
            debug!("Evicted {} finished executions from memory", evicted.len());
        }
    }
}
