//! Test: Lifecycle Control - pause, resume and cancel at step boundaries

use crate::helpers::*;
use pipeline_engine::{
    EngineError, ExecutionEvent, ExecutionStatus, Orchestrator, Pipeline, PipelineExecution,
    PipelineStep, StepStatus,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Orchestrator whose first step blocks on a gate, followed by two emit steps
async fn gated_run() -> (Orchestrator, Arc<GateHandler>, PipelineExecution) {
    let orchestrator = Orchestrator::new();
    let gate = Arc::new(GateHandler::new(json!({"drafted": true})));
    orchestrator.register_handler("gate", gate.clone()).await;

    let pipeline = orchestrator
        .create_pipeline(Pipeline::new(
            "gated",
            vec![
                PipelineStep::new("draft", "gate"),
                PipelineStep::new("review", "emit").with_config(emit_config(json!({"reviewed": true}))),
                PipelineStep::new("publish", "emit").with_config(emit_config(json!({"published": true}))),
            ],
        ))
        .await
        .unwrap();

    let started = orchestrator
        .execute_pipeline(&pipeline.id, Default::default())
        .await
        .unwrap();
    tokio::time::timeout(TEST_TIMEOUT, gate.entered.notified())
        .await
        .expect("first step never started");

    (orchestrator, gate, started)
}

/// Pausing mid-step lets that step finish, then holds before the next one
#[tokio::test]
async fn test_pause_holds_next_step_until_resume() {
    let (orchestrator, gate, started) = gated_run().await;

    let suspended = Arc::new(AtomicUsize::new(0));
    let counter = suspended.clone();
    orchestrator
        .add_event_handler(move |event| {
            if matches!(event, ExecutionEvent::ExecutionSuspended { .. }) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;

    orchestrator.pause_pipeline(&started.id).await.unwrap();
    assert_eq!(
        orchestrator.get_execution_status(&started.id).await.unwrap().status,
        ExecutionStatus::Paused
    );

    gate.gate.add_permits(1);
    wait_until(&orchestrator, &started.id, |e| {
        e.steps[0].status == StepStatus::Completed
    })
    .await;

    // Give the run loop time to reach the next boundary; it must stay put
    tokio::time::sleep(Duration::from_millis(100)).await;
    let held = orchestrator.get_execution_status(&started.id).await.unwrap();
    assert_eq!(held.status, ExecutionStatus::Paused);
    assert_eq!(held.steps[1].status, StepStatus::Pending);
    assert_eq!(held.steps[2].status, StepStatus::Pending);
    assert!(held.finished_at.is_none());
    assert_eq!(suspended.load(Ordering::SeqCst), 1);

    // Waiting on a paused execution does not return
    let still_waiting = tokio::time::timeout(
        Duration::from_millis(50),
        orchestrator.wait_for_completion(&started.id),
    )
    .await;
    assert!(still_waiting.is_err());

    orchestrator.resume_pipeline(&started.id).await.unwrap();
    let done = wait_for_completion(&orchestrator, &started.id).await;

    assert_eq!(done.status, ExecutionStatus::Completed);
    assert!(done.steps.iter().all(|s| s.status == StepStatus::Completed));
    assert_eq!(done.output.get("published"), Some(&json!(true)));
}

/// Cancelling a paused execution ends it without running further steps
#[tokio::test]
async fn test_cancel_while_paused() {
    let (orchestrator, gate, started) = gated_run().await;

    orchestrator.pause_pipeline(&started.id).await.unwrap();
    gate.gate.add_permits(1);
    wait_until(&orchestrator, &started.id, |e| {
        e.steps[0].status == StepStatus::Completed
    })
    .await;

    orchestrator.cancel_pipeline(&started.id).await.unwrap();
    let done = wait_for_completion(&orchestrator, &started.id).await;

    assert_eq!(done.status, ExecutionStatus::Cancelled);
    assert_eq!(done.error.as_deref(), Some("execution cancelled"));
    assert_eq!(done.steps[0].status, StepStatus::Completed);
    assert_eq!(done.steps[1].status, StepStatus::Pending);
    assert_eq!(done.steps[2].status, StepStatus::Pending);
    assert!(done.finished_at.is_some());
}

/// Cancelling while a step runs signals its handler and skips the rest
#[tokio::test]
async fn test_cancel_while_running() {
    let (orchestrator, _gate, started) = gated_run().await;

    orchestrator.cancel_pipeline(&started.id).await.unwrap();
    let done = wait_for_completion(&orchestrator, &started.id).await;

    assert_eq!(done.status, ExecutionStatus::Cancelled);
    assert_eq!(done.error.as_deref(), Some("execution cancelled"));
    assert_eq!(done.steps[0].status, StepStatus::Failed);
    assert!(done.steps[0]
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("Cancelled"));
    assert_eq!(done.steps[1].status, StepStatus::Pending);
    assert_eq!(done.steps[2].status, StepStatus::Pending);
}

/// Transitions that don't apply to the current status are rejected
#[tokio::test]
async fn test_invalid_transitions_are_rejected() {
    let (orchestrator, gate, started) = gated_run().await;

    // Running: resume is invalid, pause twice is invalid
    let err = orchestrator.resume_pipeline(&started.id).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));
    orchestrator.pause_pipeline(&started.id).await.unwrap();
    let err = orchestrator.pause_pipeline(&started.id).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));

    orchestrator.resume_pipeline(&started.id).await.unwrap();
    gate.gate.add_permits(1);
    let done = wait_for_completion(&orchestrator, &started.id).await;
    assert_eq!(done.status, ExecutionStatus::Completed);

    // Terminal: nothing applies any more
    for err in [
        orchestrator.pause_pipeline(&started.id).await.unwrap_err(),
        orchestrator.resume_pipeline(&started.id).await.unwrap_err(),
        orchestrator.cancel_pipeline(&started.id).await.unwrap_err(),
    ] {
        assert!(matches!(err, EngineError::InvalidState(_)), "got {:?}", err);
    }
    assert_eq!(
        orchestrator.get_execution_status(&started.id).await.unwrap().status,
        ExecutionStatus::Completed
    );
}

/// Lifecycle calls on an unknown execution report it as not found
#[tokio::test]
async fn test_unknown_execution() {
    let orchestrator = Orchestrator::new();

    for err in [
        orchestrator.pause_pipeline("ghost").await.unwrap_err(),
        orchestrator.resume_pipeline("ghost").await.unwrap_err(),
        orchestrator.cancel_pipeline("ghost").await.unwrap_err(),
        orchestrator.get_execution_status("ghost").await.unwrap_err(),
    ] {
        assert_eq!(err.to_string(), "Execution not found: ghost");
    }
    assert!(orchestrator.get_progress("ghost").await.is_none());
}
