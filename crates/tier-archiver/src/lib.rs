//! # tier-archiver
//!
//! Moves records older than the retention period from the hot tier to the
//! cold tier, driven by the hot tier's change feed.
//!
//! - [`Archiver`]: classifies a batch of change events and upserts the aged
//!   records into cold storage, retrying transient failures
//! - [`PartitionWorker`]: lease-guarded, checkpointed consumption of one
//!   feed partition
//! - [`run_partitions`]: one worker per partition under a shared
//!   cancellation token
//! - [`trim_feed`]: deletes change events that are already committed

pub mod archiver;
pub mod checkpoint;
pub mod error;
pub mod retry;
pub mod worker;

#[cfg(test)]
mod testing;

pub use archiver::{Archiver, BatchReport};
pub use checkpoint::StreamCheckpoint;
pub use error::ArchiveError;
pub use retry::{upsert_with_retry, RetryConfig};
pub use worker::{run_partitions, trim_feed, PartitionWorker, WorkerConfig, WorkerStats};
