//! Test: Success Chain - steps run one after another in array order

use crate::helpers::*;
use pipeline_engine::core::config::PipelineFile;
use pipeline_engine::core::context::into_map;
use pipeline_engine::{ExecutionStatus, Orchestrator, Pipeline, PipelineStep, StepStatus};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Three handlers register, run in order, and each runs exactly once
#[tokio::test]
async fn test_success_chain() {
    let orchestrator = Orchestrator::new();
    let journal = Journal::new();

    let gen = MockHandler::ok("gen", json!({"title": "Rust async", "body": "draft"}))
        .with_delay(Duration::from_millis(10))
        .with_journal(&journal);
    let optimize = MockHandler::ok("optimize", json!({"body": "polished"}))
        .with_delay(Duration::from_millis(10))
        .with_journal(&journal);
    let score = MockHandler::ok("score", json!({"score": 0.92}))
        .with_delay(Duration::from_millis(10))
        .with_journal(&journal);
    let counters = [gen.calls(), optimize.calls(), score.calls()];

    orchestrator.register_handler("ai_content_generator", Arc::new(gen)).await;
    orchestrator.register_handler("content_optimizer", Arc::new(optimize)).await;
    orchestrator.register_handler("quality_scorer", Arc::new(score)).await;

    let pipeline = Pipeline::new(
        "Content Publish",
        vec![
            PipelineStep::new("gen", "ai_content_generator"),
            PipelineStep::new("optimize", "content_optimizer").with_dependencies(&["gen"]),
            PipelineStep::new("score", "quality_scorer").with_dependencies(&["optimize"]),
        ],
    );

    let result = run_pipeline(&orchestrator, pipeline, json!({"topic": "rust"})).await;

    assert_pipeline_completed(&result);
    assert_sequential(&journal, &["gen", "optimize", "score"]);
    assert_step_output(&result, "gen", "title", json!("Rust async"));
    assert_step_output(&result, "score", "score", json!(0.92));
    for counter in &counters {
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    // Cumulative output folds step outputs in order; later steps win
    assert_eq!(
        result.execution.output,
        into_map(json!({"title": "Rust async", "body": "polished", "score": 0.92}))
    );
    assert!(result.execution.error.is_none());
    assert!(result.execution.finished_at.is_some());
}

/// The initial snapshot has one pending record per step, in order
#[tokio::test]
async fn test_initial_snapshot_has_pending_steps() {
    let orchestrator = Orchestrator::new();
    let gate = Arc::new(GateHandler::new(json!({})));
    orchestrator.register_handler("gate", gate.clone()).await;

    let pipeline = orchestrator
        .create_pipeline(Pipeline::new(
            "held",
            vec![
                PipelineStep::new("a", "gate"),
                PipelineStep::new("b", "emit"),
                PipelineStep::new("c", "emit"),
            ],
        ))
        .await
        .unwrap();

    let started = orchestrator
        .execute_pipeline(&pipeline.id, Default::default())
        .await
        .unwrap();

    assert_eq!(started.status, ExecutionStatus::Running);
    assert_eq!(started.pipeline_id, pipeline.id);
    let ids: Vec<&str> = started.steps.iter().map(|s| s.step_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert!(started.steps.iter().all(|s| s.status == StepStatus::Pending));

    // While the first step is held, it shows as running and progress points at it
    gate.entered.notified().await;
    let snapshot = wait_until(&orchestrator, &started.id, |e| {
        e.steps[0].status == StepStatus::Running
    })
    .await;
    assert!(snapshot.steps[0].started_at.is_some());
    let progress = orchestrator.get_progress(&started.id).await.unwrap();
    assert_eq!(progress.step_id, "a");
    assert_eq!(progress.progress, 0);
    assert_eq!(progress.current_step, "step 1/3: a");

    gate.gate.add_permits(1);
    let done = wait_for_completion(&orchestrator, &started.id).await;
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert!(done.steps.iter().all(|s| s.progress == 100));
}

/// A YAML definition drives the built-in emit handler end to end
#[tokio::test]
async fn test_yaml_definition_with_builtin_handler() {
    let yaml = r#"
name: "Emit Chain"
description: "Built-in handlers only"
steps:
  - id: "first"
    name: "First"
    handler: "emit"
    config:
      output:
        stage: 1
        first: true
  - id: "second"
    name: "Second"
    handler: "emit"
    depends_on: ["first"]
    config:
      output:
        stage: 2
"#;

    let file = PipelineFile::from_yaml(yaml).unwrap();
    let orchestrator = Orchestrator::new();
    let result = run_pipeline(&orchestrator, file.to_pipeline(), json!({})).await;

    assert_pipeline_completed(&result);
    assert_eq!(result.execution.output["stage"], json!(2));
    assert_eq!(result.execution.output["first"], json!(true));
    assert_eq!(result.step("first").attempts, 1);

    let logs = orchestrator.get_execution_logs(&result.execution.id).await.unwrap();
    assert!(logs.is_empty());
}

/// Executions of the same pipeline are independent runs
#[tokio::test]
async fn test_repeated_runs_are_independent() {
    let orchestrator = Orchestrator::new();
    let pipeline = orchestrator
        .create_pipeline(Pipeline::new(
            "twice",
            vec![PipelineStep::new("only", "emit").with_config(emit_config(json!({"x": 1})))],
        ))
        .await
        .unwrap();

    let first = orchestrator
        .execute_pipeline(&pipeline.id, into_map(json!({"run": 1})))
        .await
        .unwrap();
    let second = orchestrator
        .execute_pipeline(&pipeline.id, into_map(json!({"run": 2})))
        .await
        .unwrap();
    assert_ne!(first.id, second.id);

    let first = wait_for_completion(&orchestrator, &first.id).await;
    let second = wait_for_completion(&orchestrator, &second.id).await;
    assert_eq!(first.input["run"], json!(1));
    assert_eq!(second.input["run"], json!(2));
    assert_eq!(
        orchestrator.list_executions(Some(&pipeline.id)).await.len(),
        2
    );
}
