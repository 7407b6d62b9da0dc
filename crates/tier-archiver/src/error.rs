//! Error types for the archiver.

use thiserror::Error;

use tier_storage::StorageError;
use tier_types::TierError;

/// Errors that can occur while migrating records
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Cold write failed fatally or exhausted its retries, or the change
    /// feed could not be read
    #[error("Tier error: {0}")]
    Tier(#[from] TierError),

    /// Lease or checkpoint store failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Checkpoint load/save issues
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// JSON encoding/decoding errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Another owner took the partition, or it was never acquired
    #[error("Lease lost for partition {partition}")]
    LeaseLost { partition: u32 },

    /// Partition outside the change feed's key space
    #[error("Partition {partition} out of range (feed has {partitions})")]
    InvalidPartition { partition: u32, partitions: u32 },

    /// A worker task panicked or was aborted
    #[error("Worker error: {0}")]
    Worker(String),
}

impl From<serde_json::Error> for ArchiveError {
    fn from(err: serde_json::Error) -> Self {
        ArchiveError::Serialization(err.to_string())
    }
}

impl ArchiveError {
    /// Whether the worker loop should stop instead of redelivering.
    ///
    /// Only transient tier and storage failures are worth waiting out.
    /// Fatal and configuration errors need an operator.
    pub fn is_terminal(&self) -> bool {
        match self {
            ArchiveError::LeaseLost { .. } | ArchiveError::InvalidPartition { .. } => true,
            ArchiveError::Tier(e) => !e.is_transient(),
            ArchiveError::Storage(e) => !e.is_transient(),
            _ => false,
        }
    }
}
