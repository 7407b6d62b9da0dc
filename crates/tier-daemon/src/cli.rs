//! CLI argument parsing for the tier daemon.
//!
//! CLI flags override all other config sources.

use clap::{Parser, Subcommand};

/// Tiered Record Store
///
/// Migrates aged records from the hot tier to the cold tier and reads
/// records from whichever tier holds them.
#[derive(Parser, Debug)]
#[command(name = "tier-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/tiered-store/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the archiver over the hot tier's change feed
    Archive {
        /// Partition to consume (repeatable; default: all)
        #[arg(short, long = "partition")]
        partitions: Vec<u32>,

        /// Drain each partition once and exit instead of running until stopped
        #[arg(long)]
        once: bool,
    },

    /// Look up a record, hot tier first
    Get {
        /// Record id
        #[arg(required_unless_present = "request", conflicts_with = "request")]
        id: Option<String>,

        /// JSON request body, e.g. '{"id":"A1"}'
        #[arg(long)]
        request: Option<String>,
    },

    /// Write records into the hot tier
    Put {
        /// Record as JSON, e.g. '{"id":"A1","timestamp":"2024-01-15"}'
        #[arg(required = true)]
        records: Vec<String>,
    },

    /// Show tier statistics
    Stats,

    /// Show archiver checkpoints and partition leases
    Checkpoints,

    /// Delete committed change events from the hot tier's feed
    TrimFeed {
        /// Partition to trim (repeatable; default: all)
        #[arg(short, long = "partition")]
        partitions: Vec<u32>,
    },

    /// Print the effective configuration as TOML
    Config,
}
