//! CLI command definitions and subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;

/// aidf - autonomous task execution engine
#[derive(Parser)]
#[command(name = "aidf", about = "Scope-guarded, validated, iterative LLM task runner", version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(short = 'l', long = "log-level", global = true, help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the executor on a single task until a terminal status is reached
    Exec {
        /// Path to the task Markdown file
        task_path: PathBuf,

        /// Resume a previously blocked task
        #[arg(long)]
        resume: bool,

        /// Parse and load context but never invoke the provider
        #[arg(long)]
        dry_run: bool,

        /// Override the configured provider type (cli-subprocess, api-tool-use)
        #[arg(long)]
        provider: Option<String>,

        /// Override the configured model
        #[arg(long)]
        model: Option<String>,
    },

    /// Run every task named in an implementation plan, in dependency order
    Plan {
        /// Path to the plan Markdown file
        plan_path: PathBuf,

        /// Maximum tasks to run concurrently within one wave
        #[arg(long)]
        concurrency: Option<usize>,

        /// Keep running later waves after a task fails
        #[arg(long)]
        continue_on_error: bool,

        /// Resolve waves and mark tasks complete without running the provider
        #[arg(long)]
        dry_run: bool,
    },

    /// Inspect past execution reports
    Report {
        #[command(subcommand)]
        command: ReportCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum ReportCommand {
    /// List reports, most recent first
    List {
        /// Filter by status (completed, blocked, failed)
        #[arg(long)]
        status: Option<String>,

        /// Filter by task path
        #[arg(long)]
        task: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Read a single report by its run ID prefix (minimum 4 hex characters)
    Read {
        run_id_prefix: String,

        /// Output format
        #[arg(short, long, default_value = "json")]
        format: OutputFormat,
    },

    /// Aggregate statistics across every recorded report
    Aggregate {
        /// Filter by status (completed, blocked, failed)
        #[arg(long)]
        status: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Output format for report subcommands
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {s}. Use: text or json")),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Get the log file path, matching the data directory `setup_logging` writes to.
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("aidf").join("logs").join("aidf.log")
}
