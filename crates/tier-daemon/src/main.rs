//! Tiered Record Store daemon
//!
//! Runs the archiver that migrates aged records from the hot tier to the
//! cold tier, and serves tiered lookups from the command line.
//!
//! # Usage
//!
//! ```bash
//! tier-daemon archive [--partition N]... [--once]
//! tier-daemon get <ID> | --request '{"id":"A1"}'
//! tier-daemon put '{"id":"A1","timestamp":"2024-01-15"}'
//! tier-daemon stats | checkpoints | trim-feed | config
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/tiered-store/config.toml)
//! 3. --config file
//! 4. Environment variables (TIER__*)
//! 5. CLI flags

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use tier_daemon::{
    handle_get, handle_put, init_logging, load_settings, render_config, run_archiver,
    show_checkpoints, show_stats, trim_feeds, Cli, Commands,
};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let settings = load_settings(cli.config.as_deref(), cli.log_level.as_deref())?;
    init_logging(&settings.log_level)?;

    match cli.command {
        Commands::Archive { partitions, once } => {
            run_archiver(&settings, &partitions, once).await?;
        }
        Commands::Get { id, request } => {
            return handle_get(&settings, id.as_deref(), request.as_deref()).await;
        }
        Commands::Put { records } => {
            handle_put(&settings, &records)?;
        }
        Commands::Stats => {
            show_stats(&settings)?;
        }
        Commands::Checkpoints => {
            show_checkpoints(&settings)?;
        }
        Commands::TrimFeed { partitions } => {
            trim_feeds(&settings, &partitions)?;
        }
        Commands::Config => {
            println!("{}", render_config(&settings)?);
        }
    }

    Ok(ExitCode::SUCCESS)
}
