//! Storage layer error types.

use rocksdb::ErrorKind;
use thiserror::Error;

use tier_types::TierError;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// RocksDB operation failed
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// Column family not found
    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    /// Key encoding/decoding error
    #[error("Key error: {0}")]
    Key(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Record rejected before write
    #[error("Invalid record: {0}")]
    InvalidRecord(#[from] TierError),

    /// Store was created with a different partition count
    #[error("Partition count mismatch: store has {stored}, configured {requested}")]
    PartitionMismatch { stored: u32, requested: u32 },

    /// Partition outside the store's key space
    #[error("Partition {partition} out of range (store has {partitions})")]
    PartitionOutOfRange { partition: u32, partitions: u32 },

    /// A writer panicked while holding the store lock
    #[error("Store lock poisoned")]
    Poisoned,

    /// Write attempted through a follower handle
    #[error("Tier {0} is opened as a follower and cannot be written")]
    Follower(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl StorageError {
    /// Busy/timeout style RocksDB failures; everything else is fatal.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::RocksDb(e) => matches!(
                e.kind(),
                ErrorKind::Busy | ErrorKind::TimedOut | ErrorKind::TryAgain | ErrorKind::Incomplete
            ),
            _ => false,
        }
    }

    /// Classify for callers that only understand the tier taxonomy.
    pub fn into_tier_error(self, tier: &str) -> TierError {
        if self.is_transient() {
            return TierError::transient(tier, self.to_string());
        }
        match self {
            StorageError::RocksDb(e) => TierError::fatal(tier, e.to_string()),
            StorageError::InvalidRecord(inner) => inner,
            StorageError::PartitionMismatch { .. } => TierError::Config(self.to_string()),
            other => TierError::fatal(tier, other.to_string()),
        }
    }
}
