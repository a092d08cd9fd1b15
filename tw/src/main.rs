//! Tripwire - incident delivery gated by pause and agent presence
//!
//! CLI entry point for running the orchestrator and poking shared state.

use std::fs;
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use tracing::{debug, info, warn};
use uuid::Uuid;

use eventstore::{Event, EventQueue};
use tripwire::cli::{Cli, Command, OutputFormat, get_log_path};
use tripwire::config::Config;
use tripwire::{JsonLinesConsumer, Orchestrator, Participant, PauseCoordinator, PresenceRegistry};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    // Setup logging with priority: CLI > config > INFO default
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    // Load configuration
    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if let Some(state_dir) = cli.state_dir {
        config.state_dir = state_dir;
    }
    info!(state_dir = ?config.state_dir, backend = %config.storage.backend, "Tripwire loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Run => cmd_run(&config).await,
        Command::Pause { reason, by } => cmd_pause(&config, &reason, by),
        Command::Resume => cmd_resume(&config),
        Command::Status { format } => cmd_status(&config, format),
        Command::Emit {
            kind,
            payload,
            trace_id,
            route,
            status,
        } => {
            let trace_id = trace_id.unwrap_or_else(|| Uuid::now_v7().to_string());
            let mut event = Event::new(kind.into(), trace_id, payload);
            if let Some(route) = route {
                event = event.with_route(route);
            }
            if let Some(status) = status {
                event = event.with_status(status);
            }
            cmd_emit(&config, event)
        }
        Command::Work { command } => cmd_work(&config, command).await,
    }
}

/// Run the orchestrator until SIGINT/SIGTERM
async fn cmd_run(config: &Config) -> Result<()> {
    debug!("cmd_run: called");
    let orchestrator = Orchestrator::new(config, Arc::new(JsonLinesConsumer));
    if !orchestrator.queue().is_available() {
        warn!("Event store unavailable; orchestrator will deliver nothing");
        eprintln!("{} Event store unavailable, see {}", "!".yellow(), get_log_path().display());
    }

    let handle = orchestrator.handle();
    let task = tokio::spawn(orchestrator.run());
    info!("Orchestrator running. Press Ctrl+C to stop.");

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = sigint.recv() => warn!("SIGINT received"),
            _ = sigterm.recv() => warn!("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        warn!("Ctrl+C received");
    }

    info!("Shutting down...");
    let _ = handle.shutdown().await;
    task.await.context("Orchestrator task failed")?;
    Ok(())
}

fn cmd_pause(config: &Config, reason: &str, by: Option<String>) -> Result<()> {
    debug!(%reason, ?by, "cmd_pause: called");
    let by = by.unwrap_or_else(|| format!("tw-{}", std::process::id()));
    let pause = PauseCoordinator::from_config(&config.pause, &config.state_dir);
    if let Some(existing) = pause.read() {
        println!(
            "{} Replacing pause held by {} ({})",
            "!".yellow(),
            existing.by.cyan(),
            existing.reason
        );
    }
    pause.pause(reason, &by).context("Failed to write pause record")?;
    println!("{} Delivery paused by {}", "✓".green(), by.cyan());
    Ok(())
}

fn cmd_resume(config: &Config) -> Result<()> {
    debug!("cmd_resume: called");
    let pause = PauseCoordinator::from_config(&config.pause, &config.state_dir);
    if pause.resume().context("Failed to remove pause record")? {
        println!("{} Delivery resumed", "✓".green());
    } else {
        println!("Delivery was not paused");
    }
    Ok(())
}

fn cmd_status(config: &Config, format: OutputFormat) -> Result<()> {
    debug!(?format, "cmd_status: called");
    let pause = PauseCoordinator::from_config(&config.pause, &config.state_dir).read();
    let mut registry = PresenceRegistry::new(config.presence_dir());
    registry.scan();
    let participants = registry.participants();
    let gate = tripwire::GateState::resolve(pause.is_some(), registry.is_busy());
    let queue = EventQueue::open(&config.storage, &config.state_dir);
    let stats = queue.stats();

    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "gate": gate,
                "pause": pause,
                "participants": participants,
                "store": stats,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            println!("Tripwire Status");
            println!("  State dir: {}", config.state_dir.display());
            println!("  Gate: {}", gate.to_string().cyan());
            match &pause {
                Some(record) => {
                    let held = Utc::now() - record.since;
                    println!(
                        "  Paused by {} for {}m: {}",
                        record.by.yellow(),
                        held.num_minutes(),
                        record.reason
                    );
                }
                None => println!("  Paused: no"),
            }
            println!("  Participants: {}", participants.len());
            for record in &participants {
                let status = if record.is_working() {
                    record.status.to_string().yellow()
                } else {
                    record.status.to_string().green()
                };
                println!("    {} pid {} {}", record.id, record.pid, status);
            }
            match stats {
                Some(stats) => println!(
                    "  Store: {} ({} pending, {} total, {} bytes)",
                    stats.backend, stats.pending, stats.total, stats.size_bytes
                ),
                None => println!("  Store: {}", "unavailable".red()),
            }
        }
    }
    Ok(())
}

fn cmd_emit(config: &Config, event: Event) -> Result<()> {
    debug!(kind = %event.kind, "cmd_emit: called");
    let queue = EventQueue::open(&config.storage, &config.state_dir);
    let trace_id = event.trace_id.clone();
    if !queue.emit(event) {
        return Err(eyre!("Failed to append event (see {})", get_log_path().display()));
    }
    println!("{} Emitted {}", "✓".green(), trace_id.cyan());
    Ok(())
}

/// Run a command while registered as a working participant
async fn cmd_work(config: &Config, command: Vec<String>) -> Result<()> {
    debug!(?command, "cmd_work: called");
    let (program, args) = command.split_first().ok_or_else(|| eyre!("No command given"))?;

    let queue = EventQueue::open(&config.storage, &config.state_dir);
    let mut participant =
        Participant::register(config.presence_dir(), queue).context("Failed to register participant")?;
    participant.begin_work().context("Failed to mark participant working")?;

    let status = tokio::process::Command::new(program)
        .args(args)
        .status()
        .await
        .context(format!("Failed to run {}", program));

    if let Err(e) = participant.end_work() {
        warn!(error = %e, "Failed to mark participant idle");
    }
    participant.deregister().context("Failed to deregister participant")?;

    let status = status?;
    if !status.success() {
        let code = status.code().unwrap_or(1);
        debug!(code, "cmd_work: command failed");
        std::process::exit(code);
    }
    Ok(())
}

