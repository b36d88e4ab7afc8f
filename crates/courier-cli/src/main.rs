//! Courier CLI - operator tooling for the courier event bus.
//!
//! Builds one bus from the resolved configuration and runs a single
//! administrative operation against its queue.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use courier_config::{Config, ResolvedConfig};

mod commands;
mod config_bridge;
mod theme;

use commands::{config, emit, queue};

/// Courier - event bus operator CLI
#[derive(Parser)]
#[command(name = "courier")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Load this file instead of the layered configuration
    #[arg(short, long, global = true, env = "COURIER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay queued events this consumer has not seen yet
    ProcessOffline {
        /// Maximum records to replay (defaults to `bus.offline_batch_limit`)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Delete every queued record
    ClearQueue {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },

    /// Delete records that were already processed
    ClearProcessed,

    /// Show queue counts and the consumer cursor
    Stats {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Emit an event through the configured strategy
    Emit {
        /// Dot-namespaced event name, e.g. `example.todo.created`
        name: String,

        /// JSON payload
        #[arg(short, long, default_value = "{}")]
        payload: String,

        /// JSON snapshot of the state before the change
        #[arg(long)]
        previous: Option<String>,

        /// Record the event in the durable queue
        #[arg(long)]
        persistent: bool,
    },

    /// View configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show resolved configuration with source annotations
    Show {
        /// Print JSON instead of annotated TOML
        #[arg(long)]
        json: bool,
    },
}

fn load_config(path: Option<&Path>) -> Result<ResolvedConfig> {
    match path {
        Some(path) => Config::load_file(path)
            .with_context(|| format!("failed to load {}", path.display())),
        None => {
            let workspace_root = std::env::current_dir().ok();
            Config::load(workspace_root.as_deref()).context("failed to load configuration")
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let resolved = load_config(cli.config.as_deref())?;

    let mut log_config = config_bridge::to_log_config(&resolved.config);
    if cli.verbose {
        "debug".clone_into(&mut log_config.level);
    }
    if let Err(e) = courier_telemetry::setup_logging(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let cfg = &resolved.config;
    let bus = || config_bridge::to_event_bus(cfg);

    match cli.command {
        Commands::ProcessOffline { limit } => {
            let limit = limit.unwrap_or(cfg.bus.offline_batch_limit);
            queue::process_offline(&bus().await?, limit).await
        },
        Commands::ClearQueue { yes } => queue::clear_queue(&bus().await?, yes).await,
        Commands::ClearProcessed => queue::clear_processed(&bus().await?).await,
        Commands::Stats { json } => queue::show_stats(&bus().await?, json).await,
        Commands::Emit {
            name,
            payload,
            previous,
            persistent,
        } => {
            emit::emit_event(
                &bus().await?,
                &name,
                &payload,
                previous.as_deref(),
                persistent,
            )
            .await
        },
        Commands::Config { command } => handle_config(&command, &resolved),
    }
}

fn handle_config(command: &ConfigCommands, resolved: &ResolvedConfig) -> Result<()> {
    match command {
        ConfigCommands::Show { json } => config::show_config(resolved, *json),
    }
}
