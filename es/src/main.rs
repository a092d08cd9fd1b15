use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use log::info;
use uuid::Uuid;

use eventstore::cli::{Cli, Command};
use eventstore::config::Config;
use eventstore::{Event, EventQueue};

fn setup_logging() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Warn)
        .parse_default_env()
        .init();
    Ok(())
}

fn print_event(event: &Event, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event).context("Failed to serialize event")?);
        return Ok(());
    }

    let mut tags = Vec::new();
    if let Some(env) = &event.environment {
        tags.push(format!("env={}", env));
    }
    if let Some(feature) = &event.feature {
        tags.push(format!("feature={}", feature));
    }
    if let Some(route) = &event.route {
        tags.push(format!("route={}", route));
    }
    if let Some(status) = event.status {
        tags.push(format!("status={}", status));
    }

    let marker = if event.consumed { "✓".dimmed() } else { "•".yellow() };
    println!(
        "{} {} {} {} {}",
        marker,
        event.timestamp.format("%Y-%m-%d %H:%M:%S%.3f").to_string().dimmed(),
        event.kind.to_string().cyan(),
        event.trace_id,
        tags.join(" ").dimmed()
    );
    Ok(())
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if let Some(state_dir) = cli.state_dir {
        config.state_dir = state_dir;
    }
    if let Some(backend) = cli.backend {
        config.storage.backend = backend.into();
    }

    info!("es starting with {} backend", config.storage.backend);

    let queue = EventQueue::open(&config.storage, &config.state_dir);
    if !queue.is_available() {
        return Err(eyre!(
            "Event store ({}) unavailable under {}",
            config.storage.backend,
            config.state_dir.display()
        ));
    }

    match cli.command {
        Command::Stats => {
            let stats = queue.stats().ok_or_else(|| eyre!("Failed to read store stats"))?;
            println!("Backend: {}", stats.backend.to_string().cyan());
            println!("  Pending: {}", stats.pending);
            println!("  Total: {}", stats.total);
            println!("  Size: {} bytes", stats.size_bytes);
        }
        Command::Recent { limit, json } => {
            let events = queue.recent(limit);
            if events.is_empty() && !json {
                println!("No events found");
            }
            for event in &events {
                print_event(event, json)?;
            }
        }
        Command::Drain { json } => {
            let events = queue.drain();
            if events.is_empty() && !json {
                println!("Nothing to drain");
            }
            for event in &events {
                print_event(event, json)?;
            }
        }
        Command::Retain => {
            let report = queue.retain(&config.storage.retention.policy());
            if report.is_empty() {
                println!("Nothing to prune");
            } else {
                println!(
                    "{} Removed {} events, {} access logs, {} temp files{}",
                    "✓".green(),
                    report.events_removed,
                    report.access_logs_removed,
                    report.temp_files_removed,
                    if report.compacted { " (size ceiling hit)" } else { "" }
                );
            }
        }
        Command::Emit {
            kind,
            payload,
            trace_id,
            environment,
            feature,
            route,
            status,
        } => {
            let trace_id = trace_id.unwrap_or_else(|| Uuid::now_v7().to_string());
            let mut event = Event::new(kind.into(), trace_id.clone(), payload);
            if let Some(env) = environment {
                event = event.with_environment(env);
            }
            if let Some(feature) = feature {
                event = event.with_feature(feature);
            }
            if let Some(route) = route {
                event = event.with_route(route);
            }
            if let Some(status) = status {
                event = event.with_status(status);
            }
            if !queue.emit(event) {
                return Err(eyre!("Failed to append event"));
            }
            println!("{} Emitted {}", "✓".green(), trace_id.cyan());
        }
    }

    Ok(())
}
