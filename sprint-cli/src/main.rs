//! # sprint-sync
//!
//! CLI for planning and simulating sprint-sync sessions.
//!
//! ## Commands
//!
//! - `init`: Write a default configuration file
//! - `plan`: Show the phase timeline of the configured session
//! - `simulate`: Run a host and a companion against each other in-process
//!
//! ## Example
//!
//! ```bash
//! # Create a config to edit
//! sprint-sync init
//!
//! # Check the plan
//! sprint-sync plan
//!
//! # Watch the two devices converge while the link drops for 30 s
//! sprint-sync simulate --time-scale 120 --drop-at 400
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;

use commands::{init, plan, simulate};
use config::Config;

/// Plan and simulate sprint-sync sessions.
#[derive(Parser, Debug)]
#[command(name = "sprint-sync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: platform config dir)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the phase timeline of the configured session
    Plan {
        /// Print the session config as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a host and a companion against each other in-process
    Simulate {
        /// Simulated seconds per real second
        #[arg(long)]
        time_scale: Option<f64>,

        /// Runner speed in meters per second
        #[arg(long)]
        speed: Option<f64>,

        /// Drop the link this many simulated seconds in
        #[arg(long)]
        drop_at: Option<u64>,

        /// Keep the link down for this many simulated seconds
        #[arg(long, requires = "drop_at")]
        drop_for: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => {
            let path = match cli.config {
                Some(path) => path,
                None => config::default_config_path()
                    .context("Could not determine config directory")?,
            };
            init::run(&path, force)?;
        }
        Commands::Plan { json } => {
            let config = Config::load(cli.config.as_deref())?;
            plan::run(&config, json)?;
        }
        Commands::Simulate {
            time_scale,
            speed,
            drop_at,
            drop_for,
        } => {
            let mut config = Config::load(cli.config.as_deref())?;
            if let Some(scale) = time_scale {
                config.simulation.time_scale = scale;
            }
            if let Some(speed) = speed {
                config.simulation.runner_speed_mps = speed;
            }
            if drop_at.is_some() {
                config.simulation.link_drop_at_secs = drop_at;
            }
            if let Some(secs) = drop_for {
                config.simulation.link_drop_secs = secs;
            }
            simulate::run(&config).await?;
        }
    }

    Ok(())
}
