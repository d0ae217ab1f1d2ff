//! CLI command definitions

use crate::core::DataMap;
use clap::Args;
use serde_json::Value;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML or JSON file
    #[arg(short, long)]
    pub file: String,

    /// Execution input (key=value; values that parse as JSON are kept typed)
    #[arg(short, long, value_parser = parse_key_value)]
    pub input: Vec<(String, String)>,

    /// Don't save the pipeline or its execution to history
    #[arg(long)]
    pub no_history: bool,

    /// Print the final execution as JSON
    #[arg(long)]
    pub json: bool,
}

impl RunCommand {
    pub fn input_map(&self) -> DataMap {
        self.input
            .iter()
            .map(|(key, value)| (key.clone(), parse_value(value)))
            .collect()
    }
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML or JSON file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show execution history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline id to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent executions to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show one execution with its steps
#[derive(Debug, Args, Clone)]
pub struct ShowCommand {
    /// Execution id
    pub execution_id: String,

    /// Include step logs
    #[arg(long)]
    pub logs: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show execution statistics
#[derive(Debug, Args, Clone)]
pub struct StatsCommand {
    /// Pipeline id to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Delete finished executions older than this many days first
    #[arg(long)]
    pub cleanup_days: Option<i64>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List bundled templates, or print one
#[derive(Debug, Args, Clone)]
pub struct TemplatesCommand {
    /// Template id to print in full
    pub id: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}

/// JSON if it parses, otherwise the raw string
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
