//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{
    HistoryCommand, RunCommand, ShowCommand, StatsCommand, TemplatesCommand, ValidateCommand,
};
use std::ffi::OsString;
use std::path::PathBuf;

/// Runs pipelines of pluggable step handlers and keeps their history
#[derive(Debug, Parser, Clone)]
#[command(name = "pipeline-engine")]
#[command(version)]
#[command(about = "Run pipelines of pluggable step handlers", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// SQLite database path (defaults to the local data directory)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a pipeline
    Run(RunCommand),

    /// Validate a pipeline configuration
    Validate(ValidateCommand),

    /// Show execution history
    History(HistoryCommand),

    /// Show one execution
    Show(ShowCommand),

    /// Show execution statistics
    Stats(StatsCommand),

    /// List bundled pipeline templates
    Templates(TemplatesCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
