//! Test: Retry Behavior - retry counts, backoff delays and step deadlines

use crate::helpers::*;
use pipeline_engine::core::config::{PipelineFile, RetryKind, RetryStrategy};
use pipeline_engine::{ExecutionEvent, Orchestrator, Pipeline, PipelineStep, StepStatus};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn fixed(initial_delay_ms: u64, max_retries: u32) -> RetryStrategy {
    RetryStrategy {
        kind: RetryKind::Fixed,
        initial_delay_ms,
        max_retries,
        ..Default::default()
    }
}

fn single_step(handler: &str, strategy: RetryStrategy) -> Pipeline {
    let mut pipeline = Pipeline::new("retrying", vec![PipelineStep::new("flaky", handler)])
        .with_fail_fast(true);
    pipeline.config.retry_strategy = strategy;
    pipeline
}

/// A step that keeps failing is attempted exactly 1 + retries times
#[tokio::test]
async fn test_exhausted_retries_attempt_count() {
    let orchestrator = Orchestrator::new();
    let handler = MockHandler::failing("flaky", "upstream 503");
    let calls = handler.calls();
    orchestrator.register_handler("flaky", Arc::new(handler)).await;

    let result = run_pipeline(&orchestrator, single_step("flaky", fixed(5, 2)), json!({})).await;

    assert_pipeline_failed(&result);
    assert_step_failed(&result, "flaky", "upstream 503");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(result.step("flaky").attempts, 3);

    // One log line per retry that was scheduled
    let logs = &result.step("flaky").logs;
    assert_eq!(logs.len(), 2);
    assert!(logs[0].starts_with("attempt 1 failed:"));
    assert!(logs[1].starts_with("attempt 2 failed:"));
    assert!(logs.iter().all(|line| line.ends_with("retrying in 5ms")));
}

/// A transient failure recovers and the step output is the successful one
#[tokio::test]
async fn test_success_after_retries() {
    let orchestrator = Orchestrator::new();
    let handler = MockHandler::scripted(
        "flaky",
        vec![
            Err("timeout talking to model".to_string()),
            Err("timeout talking to model".to_string()),
            Ok(json!({"draft": "ready"})),
        ],
    );
    let calls = handler.calls();
    orchestrator.register_handler("flaky", Arc::new(handler)).await;

    let result = run_pipeline(&orchestrator, single_step("flaky", fixed(5, 3)), json!({})).await;

    assert_pipeline_completed(&result);
    assert_step_output(&result, "flaky", "draft", json!("ready"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(result.step("flaky").attempts, 3);
    assert!(result.step("flaky").error.is_none());
}

/// The step's own retry_count wins over the strategy default
#[tokio::test]
async fn test_step_retry_count_overrides_strategy() {
    let orchestrator = Orchestrator::new();
    let handler = MockHandler::failing("flaky", "nope");
    let calls = handler.calls();
    orchestrator.register_handler("flaky", Arc::new(handler)).await;

    let mut pipeline = single_step("flaky", fixed(1, 5));
    pipeline.steps[0] = PipelineStep::new("flaky", "flaky").with_retries(1);

    let result = run_pipeline(&orchestrator, pipeline, json!({})).await;

    assert_pipeline_failed(&result);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

/// A strategy of kind none never retries, whatever retry_count says
#[tokio::test]
async fn test_no_retry_kind_runs_once() {
    let orchestrator = Orchestrator::new();
    let handler = MockHandler::failing("flaky", "nope");
    let calls = handler.calls();
    orchestrator.register_handler("flaky", Arc::new(handler)).await;

    let mut pipeline = single_step("flaky", RetryStrategy::default());
    pipeline.steps[0] = PipelineStep::new("flaky", "flaky").with_retries(4);

    let result = run_pipeline(&orchestrator, pipeline, json!({})).await;

    assert_pipeline_failed(&result);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(result.step("flaky").logs.is_empty());
}

/// Backoff delays are actually waited between attempts
#[tokio::test]
async fn test_backoff_delays_are_applied() {
    let orchestrator = Orchestrator::new();
    orchestrator
        .register_handler("flaky", Arc::new(MockHandler::failing("flaky", "nope")))
        .await;

    // Linear: 40ms then 80ms
    let strategy = RetryStrategy {
        kind: RetryKind::Linear,
        initial_delay_ms: 40,
        max_retries: 2,
        ..Default::default()
    };

    let result = run_pipeline(&orchestrator, single_step("flaky", strategy), json!({})).await;

    assert_pipeline_failed(&result);
    assert!(
        result.duration_ms >= 120,
        "expected at least 120ms of backoff, took {}ms",
        result.duration_ms
    );
    let logs = &result.step("flaky").logs;
    assert!(logs[0].ends_with("retrying in 40ms"));
    assert!(logs[1].ends_with("retrying in 80ms"));
}

/// Retry attempts show up as events carrying the next attempt number
#[tokio::test]
async fn test_retry_events_are_published() {
    let orchestrator = Orchestrator::new();
    orchestrator
        .register_handler(
            "flaky",
            Arc::new(MockHandler::scripted(
                "flaky",
                vec![Err("blip".to_string()), Ok(json!({"ok": true}))],
            )),
        )
        .await;

    let retries = Arc::new(Mutex::new(Vec::new()));
    let sink = retries.clone();
    orchestrator
        .add_event_handler(move |event| {
            if let ExecutionEvent::StepRetrying {
                step_id,
                attempt,
                max_retries,
                ..
            } = event
            {
                sink.lock().unwrap().push((step_id, attempt, max_retries));
            }
        })
        .await;

    let result = run_pipeline(&orchestrator, single_step("flaky", fixed(1, 2)), json!({})).await;

    assert_pipeline_completed(&result);
    assert_eq!(*retries.lock().unwrap(), vec![("flaky".to_string(), 2, 2)]);
}

/// A handler that outlives its deadline fails the step with a timeout
#[tokio::test]
async fn test_step_timeout() {
    let yaml = r#"
name: "Slow"
config:
  fail_fast: true
steps:
  - id: "slow"
    handler: "sleeper"
    timeout_secs: 1
  - id: "after"
    handler: "emit"
"#;

    let orchestrator = Orchestrator::new();
    let sleeper = MockHandler::ok("sleeper", json!({"late": true})).with_delay(Duration::from_secs(5));
    orchestrator.register_handler("sleeper", Arc::new(sleeper)).await;

    let pipeline = PipelineFile::from_yaml(yaml).unwrap().to_pipeline();
    let result = run_pipeline(&orchestrator, pipeline, json!({})).await;

    assert_pipeline_failed(&result);
    assert_step_failed(&result, "slow", "timed out after 1 seconds");
    assert_eq!(result.step_status("after"), StepStatus::Pending);
    assert!(
        result.duration_ms < 4000,
        "timeout should cut the handler short, took {}ms",
        result.duration_ms
    );
}
