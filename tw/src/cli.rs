//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use eventstore::cli::KindArg;
use std::path::PathBuf;
use tracing::debug;

/// Tripwire - incident delivery with advisory pause and agent presence
#[derive(Parser)]
#[command(
    name = "tw",
    about = "Deliver runtime incidents to a consumer, gated by pause and agent presence",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Override the state directory
    #[arg(short, long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the orchestrator in the foreground, printing batches as JSON lines
    Run,

    /// Pause delivery (overwrites any existing pause)
    Pause {
        /// Why delivery is paused
        #[arg(short, long)]
        reason: String,

        /// Who is pausing (default: tw-<pid>)
        #[arg(short, long)]
        by: Option<String>,
    },

    /// Resume delivery
    Resume,

    /// Show gate inputs: pause record, participants, store counters
    Status {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Append an incident to the store
    Emit {
        /// Event type
        #[arg(value_enum)]
        kind: KindArg,

        /// Payload (JSON text, stored as-is)
        #[arg(short, long, default_value = "{}")]
        payload: String,

        /// Trace id (default: generated)
        #[arg(short, long)]
        trace_id: Option<String>,

        /// Route tag
        #[arg(long)]
        route: Option<String>,

        /// HTTP status tag
        #[arg(long)]
        status: Option<u16>,
    },

    /// Run a command as a working participant, holding delivery while it runs
    Work {
        /// Command and arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tripwire")
        .join("logs")
        .join("tripwire.log");
    debug!(?path, "get_log_path: returning path");
    path
}

/// Output format for the status command
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
            _ => Err(format!("Unknown format: {}. Valid: text, json", s)),
        }
    }
}
