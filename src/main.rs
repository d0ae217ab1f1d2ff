use anyhow::{bail, Context, Result};
use pipeline_engine::cli::commands::{
    HistoryCommand, RunCommand, ShowCommand, StatsCommand, TemplatesCommand, ValidateCommand,
};
use pipeline_engine::cli::output::*;
use pipeline_engine::cli::{Cli, Command};
use pipeline_engine::core::config::PipelineFile;
use pipeline_engine::core::templates;
use pipeline_engine::persistence::{ExecutionSummary, InMemoryStore, PipelineStore};
use pipeline_engine::{ExecutionEvent, ExecutionStatus, Orchestrator, PipelineExecution};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,pipeline_engine={}", default_level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd, cli.db.as_deref()).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::History(cmd) => show_history(cmd, cli.db.as_deref()).await?,
        Command::Show(cmd) => show_execution(cmd, cli.db.as_deref()).await?,
        Command::Stats(cmd) => show_stats(cmd, cli.db.as_deref()).await?,
        Command::Templates(cmd) => show_templates(cmd)?,
    }

    Ok(())
}

/// Open the history database at `db`, or the default location
#[cfg(feature = "sqlite")]
async fn open_store(db: Option<&Path>) -> Result<Arc<dyn PipelineStore>> {
    use pipeline_engine::persistence::SqliteStore;

    let store = match db {
        Some(path) => SqliteStore::connect(path).await?,
        None => SqliteStore::with_default_path().await?,
    };
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn open_store(_db: Option<&Path>) -> Result<Arc<dyn PipelineStore>> {
    warn!("Built without the sqlite feature; history is not kept between runs");
    Ok(Arc::new(InMemoryStore::new()))
}

async fn run_pipeline(cmd: &RunCommand, db: Option<&Path>) -> Result<()> {
    let file = PipelineFile::from_file(&cmd.file).context("Failed to load pipeline definition")?;
    println!("{} Loaded pipeline: {}", INFO, style(&file.name).bold());

    let store: Arc<dyn PipelineStore> = if cmd.no_history {
        Arc::new(InMemoryStore::new())
    } else {
        open_store(db).await?
    };
    let orchestrator = Orchestrator::builder().store(store).build();

    let pipeline = orchestrator.create_pipeline(file.to_pipeline()).await?;

    let progress = create_progress_bar(pipeline.steps.len());
    let bar = progress.clone();
    orchestrator
        .add_event_handler(move |event| {
            let line = format_execution_event(&event);
            match event {
                ExecutionEvent::StepStarted { step_id, .. } => bar.set_message(step_id),
                ExecutionEvent::StepCompleted { .. } | ExecutionEvent::StepFailed { .. } => {
                    bar.inc(1);
                    bar.println(line);
                }
                ExecutionEvent::PipelineCompleted { .. } => {}
                _ => bar.println(line),
            }
        })
        .await;

    // Ctrl-C cancels the run at the next step boundary
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling execution");
            interrupt.cancel();
        }
    });

    let started = orchestrator
        .execute_pipeline_with_cancel(&pipeline.id, cmd.input_map(), cancel)
        .await?;
    let execution = orchestrator.wait_for_completion(&started.id).await?;
    progress.finish_and_clear();

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&execution)?);
    } else {
        print_execution(&execution, false);
    }

    if !cmd.no_history {
        println!(
            "\n{} Execution saved to history (ID: {})",
            INFO,
            style(short_id(&execution.id)).dim()
        );
    }

    match execution.status {
        ExecutionStatus::Completed => {
            println!(
                "\n{} {} completed {}",
                CHECK,
                style(&pipeline.name).bold(),
                style("successfully").green()
            );
            Ok(())
        }
        status => {
            println!(
                "\n{} {} {}",
                CROSS,
                style(&pipeline.name).bold(),
                format_status(status)
            );
            std::process::exit(1);
        }
    }
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    match PipelineFile::from_file(&cmd.file) {
        Ok(file) => {
            println!("{} Pipeline definition is valid!", CHECK);
            println!("  Name: {}", style(&file.name).bold());
            println!("  Steps: {}", style(file.steps.len()).cyan());
            println!("  Fail fast: {}", style(file.config.fail_fast).cyan());

            if cmd.json {
                let json = serde_json::to_string_pretty(&file)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

async fn show_history(cmd: &HistoryCommand, db: Option<&Path>) -> Result<()> {
    let store = open_store(db).await?;
    let executions = store
        .list_executions(cmd.pipeline.as_deref(), Some(cmd.limit))
        .await?;

    if executions.is_empty() {
        println!("{} No executions found", INFO);
        return Ok(());
    }

    let summaries: Vec<ExecutionSummary> = executions.iter().map(ExecutionSummary::from).collect();
    if cmd.json {
        let data = serde_json::json!({ "executions": summaries });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{} Execution history (showing latest {}):", INFO, cmd.limit);
        for summary in &summaries {
            println!("  {}", format_execution_summary(summary));
        }
    }

    Ok(())
}

async fn show_execution(cmd: &ShowCommand, db: Option<&Path>) -> Result<()> {
    let store = open_store(db).await?;
    let Some(execution) = store.load_execution(&cmd.execution_id).await? else {
        bail!("Execution not found: {}", cmd.execution_id);
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&execution)?);
    } else {
        print_execution(&execution, cmd.logs);
    }
    Ok(())
}

async fn show_stats(cmd: &StatsCommand, db: Option<&Path>) -> Result<()> {
    let store = open_store(db).await?;

    if let Some(days) = cmd.cleanup_days {
        let removed = store
            .cleanup_old_executions(chrono::Duration::days(days))
            .await?;
        println!("{} Removed {} executions older than {} days", INFO, removed, days);
    }

    let stats = store.execution_stats(cmd.pipeline.as_deref()).await?;
    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("{} Executions: {}", INFO, style(stats.total).bold());
    for status in [
        ExecutionStatus::Completed,
        ExecutionStatus::Failed,
        ExecutionStatus::Cancelled,
        ExecutionStatus::Running,
        ExecutionStatus::Paused,
    ] {
        let count = stats.count(status);
        if count > 0 {
            println!("  {}: {}", format_status(status), count);
        }
    }
    if let Some(avg) = stats.avg_duration_ms {
        println!(
            "  Average duration: {}",
            style(format_duration(std::time::Duration::from_millis(avg as u64))).dim()
        );
    }
    Ok(())
}

fn show_templates(cmd: &TemplatesCommand) -> Result<()> {
    let Some(id) = &cmd.id else {
        let pipelines = templates::list_templates()?;
        if cmd.json {
            println!("{}", serde_json::to_string_pretty(&pipelines)?);
        } else {
            println!("{} Bundled templates:", INFO);
            for pipeline in &pipelines {
                println!("  {}", format_template_line(pipeline));
            }
        }
        return Ok(());
    };

    let pipeline = templates::template(id)?;
    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&pipeline)?);
        return Ok(());
    }

    println!("{} {}", INFO, format_template_line(&pipeline));
    if !pipeline.description.is_empty() {
        println!("  {}", style(&pipeline.description).dim());
    }
    println!("  Steps:");
    for step in &pipeline.steps {
        let after = if step.depends_on.is_empty() {
            String::new()
        } else {
            format!(" after {}", step.depends_on.join(", "))
        };
        println!(
            "    {} {} [{}]{}",
            style(&step.id).bold(),
            step.name,
            style(&step.handler).cyan(),
            style(after).dim()
        );
    }
    Ok(())
}

fn print_execution(execution: &PipelineExecution, with_logs: bool) {
    println!("{} Execution Details", INFO);
    println!("  ID: {}", style(&execution.id).cyan());
    println!("  Pipeline: {}", style(&execution.pipeline_id).bold());
    println!("  Status: {}", format_status(execution.status));
    println!("  Started: {}", style(execution.started_at.to_rfc3339()).dim());
    if let Some(ms) = execution.duration_ms() {
        println!(
            "  Duration: {}",
            style(format_duration(std::time::Duration::from_millis(ms.max(0) as u64))).dim()
        );
    }
    if let Some(error) = &execution.error {
        println!("  Error: {}", style(error).red());
    }

    println!("  Steps:");
    for step in &execution.steps {
        println!("    {}", format_step_line(step));
        if with_logs {
            for line in &step.logs {
                println!("      {}", style(line).dim());
            }
        }
    }
}
