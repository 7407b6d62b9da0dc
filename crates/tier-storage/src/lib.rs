//! Storage layer for the tiered record store.
//!
//! Provides RocksDB-backed storage with:
//! - One store per tier, records keyed by id
//! - Atomic record + change feed writes via WriteBatch
//! - Per-partition, sequence-ordered change feeds
//! - A separate lease store for partition ownership and checkpoints

pub mod adapter;
pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;
pub mod lease;

pub use db::{TierOptions, TierStats, TierStore};
pub use error::StorageError;
pub use keys::{ChangeKey, CheckpointKey, LeaseKey, RecordKey};
pub use lease::{Lease, LeaseOutcome, LeaseStore};
