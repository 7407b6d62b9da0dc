//! Key encoding and decoding for storage layer.
//!
//! - records: `rec:{id}`
//! - changes: `chg:{partition:05}:{sequence:020}`, zero-padded so that a
//!   forward scan of one partition prefix yields commit order
//! - leases: `lease:{partition:05}`
//! - checkpoints: `checkpoint:{name}`

use crate::error::StorageError;

/// Key for a record snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordKey<'a> {
    pub id: &'a str,
}

impl<'a> RecordKey<'a> {
    pub fn new(id: &'a str) -> Self {
        Self { id }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("rec:{}", self.id).into_bytes()
    }
}

/// Key for a change feed entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChangeKey {
    pub partition: u32,
    pub sequence: u64,
}

impl ChangeKey {
    pub fn new(partition: u32, sequence: u64) -> Self {
        Self {
            partition,
            sequence,
        }
    }

    /// Encode key to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        format!("chg:{:05}:{:020}", self.partition, self.sequence).into_bytes()
    }

    /// Prefix shared by every change of a partition
    pub fn partition_prefix(partition: u32) -> Vec<u8> {
        format!("chg:{:05}:", partition).into_bytes()
    }

    /// Decode key from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;

        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 || parts[0] != "chg" {
            return Err(StorageError::Key(format!("Invalid change key format: {}", s)));
        }

        let partition: u32 = parts[1]
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid partition: {}", e)))?;
        let sequence: u64 = parts[2]
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid sequence: {}", e)))?;

        Ok(Self {
            partition,
            sequence,
        })
    }
}

/// Key for a partition lease
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseKey {
    pub partition: u32,
}

impl LeaseKey {
    pub fn new(partition: u32) -> Self {
        Self { partition }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("lease:{:05}", self.partition).into_bytes()
    }
}

/// Key for checkpoint entries
/// Format: checkpoint:{name}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointKey {
    /// Checkpoint name (e.g., "archiver:partition:3")
    pub name: String,
}

impl CheckpointKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("checkpoint:{}", self.name).into_bytes()
    }

    /// Recover the name from an encoded key
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;
        s.strip_prefix("checkpoint:")
            .map(Self::new)
            .ok_or_else(|| StorageError::Key(format!("Invalid checkpoint key format: {}", s)))
    }
}
