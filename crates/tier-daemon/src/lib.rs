//! Tier daemon library exports.
//!
//! This crate provides the CLI binary for the tiered record store.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (archive, get, put, inspection)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands};
pub use commands::{
    handle_get, handle_put, init_logging, load_settings, lookup, open_resolver, put_records,
    render_config, run_archiver, run_archiver_until, show_checkpoints, show_stats, trim_feeds,
};
