//! CLI argument parsing for the event store

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::event::EventKind;
use crate::store::Backend;

#[derive(Parser, Debug)]
#[command(name = "es")]
#[command(author, version, about = "Inspect and maintain the shared incident queue", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the state directory
    #[arg(short, long)]
    pub state_dir: Option<PathBuf>,

    /// Override the storage backend
    #[arg(short, long, value_enum)]
    pub backend: Option<BackendArg>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show pending/total counts and size on disk
    Stats,

    /// List recent events without consuming them
    Recent {
        /// Maximum number of events (default: 20)
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// Print raw JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Claim and print every unconsumed event
    Drain {
        /// Print raw JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Run one retention pass with the configured limits
    Retain,

    /// Append an event
    Emit {
        /// Event type
        #[arg(required = true, value_enum)]
        kind: KindArg,

        /// Payload (JSON text, stored as-is)
        #[arg(short, long, default_value = "{}")]
        payload: String,

        /// Trace id (default: generated)
        #[arg(short, long)]
        trace_id: Option<String>,

        /// Environment tag
        #[arg(long)]
        environment: Option<String>,

        /// Feature tag
        #[arg(long)]
        feature: Option<String>,

        /// Route tag
        #[arg(long)]
        route: Option<String>,

        /// HTTP status tag
        #[arg(long)]
        status: Option<u16>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum BackendArg {
    Files,
    Sqlite,
}

impl From<BackendArg> for Backend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Files => Backend::Files,
            BackendArg::Sqlite => Backend::Sqlite,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
#[value(rename_all = "snake_case")]
pub enum KindArg {
    Error,
    Crash,
    RateLimit,
    AgentStart,
    AgentStop,
}

impl From<KindArg> for EventKind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Error => EventKind::Error,
            KindArg::Crash => EventKind::Crash,
            KindArg::RateLimit => EventKind::RateLimit,
            KindArg::AgentStart => EventKind::AgentStart,
            KindArg::AgentStop => EventKind::AgentStop,
        }
    }
}
