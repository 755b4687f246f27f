//! Top-Down Signal - multi-timeframe index options signal engine
//!
//! # WARNING
//! - Signals are analysis output, not execution. Nothing here places orders.
//! - Snapshot runs are only as good as the captured data.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;

// Use the library crate
use topdown_signal::cli::commands;
use topdown_signal::config::Config;

/// Top-Down Signal - index options signal engine
#[derive(Parser)]
#[command(name = "signal")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml", env = "SIGNAL_CONFIG")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compose the signal for the configured index from a snapshot
    Analyze {
        /// Market snapshot (JSON)
        #[arg(long)]
        snapshot: PathBuf,

        /// Decision time (RFC 3339); defaults to the snapshot's as_of
        #[arg(long)]
        at: Option<DateTime<Utc>>,

        /// Print the full signal as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the constituent aggregator only
    Constituents {
        /// Market snapshot (JSON)
        #[arg(long)]
        snapshot: PathBuf,

        /// Decision time (RFC 3339); defaults to the snapshot's as_of
        #[arg(long)]
        at: Option<DateTime<Utc>>,

        /// Print the forecast as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("topdown_signal=info".parse()?),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Analyze { snapshot, at, json } => commands::analyze(&config, &snapshot, at, json).await,
        Commands::Constituents { snapshot, at, json } => {
            commands::constituents(&config, &snapshot, at, json).await
        }
        Commands::Config => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
