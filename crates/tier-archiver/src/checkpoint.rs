//! Checkpoint tracking for partition workers.
//!
//! A checkpoint records the last change-feed sequence whose batch was fully
//! migrated for one partition, enabling crash recovery and resumable
//! consumption. A restarted worker resumes strictly after it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tier_storage::LeaseStore;

use crate::error::ArchiveError;

/// Prefix of every archiver checkpoint name
pub const CHECKPOINT_PREFIX: &str = "archiver:partition:";

/// Stream position of one partition.
///
/// Persisted to the lease store to enable crash recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamCheckpoint {
    /// Partition this checkpoint is for
    pub partition: u32,

    /// Last committed sequence; `None` means nothing consumed yet
    pub last_sequence: Option<u64>,

    /// When the last batch was committed (milliseconds since epoch)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_committed_at: DateTime<Utc>,

    /// Change events consumed since checkpoint creation
    pub processed_count: u64,

    /// Records written to the cold tier since checkpoint creation
    pub migrated_count: u64,

    /// When this checkpoint was first created (milliseconds since epoch)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl StreamCheckpoint {
    /// Fresh checkpoint positioned at the start of the feed
    pub fn new(partition: u32) -> Self {
        let now = Utc::now();
        Self {
            partition,
            last_sequence: None,
            last_committed_at: now,
            processed_count: 0,
            migrated_count: 0,
            created_at: now,
        }
    }

    /// Storage name for a partition's checkpoint
    pub fn name_for(partition: u32) -> String {
        format!("{}{}", CHECKPOINT_PREFIX, partition)
    }

    pub fn name(&self) -> String {
        Self::name_for(self.partition)
    }

    /// Advance after a committed batch
    pub fn update(&mut self, last_sequence: u64, processed: u64, migrated: u64) {
        self.last_sequence = Some(last_sequence);
        self.last_committed_at = Utc::now();
        self.processed_count += processed;
        self.migrated_count += migrated;
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ArchiveError> {
        serde_json::to_vec(self).map_err(ArchiveError::from)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ArchiveError> {
        serde_json::from_slice(bytes).map_err(ArchiveError::from)
    }

    /// Load a partition's checkpoint, or `None` if it never committed.
    pub fn load(leases: &LeaseStore, partition: u32) -> Result<Option<Self>, ArchiveError> {
        match leases.get_checkpoint(&Self::name_for(partition))? {
            Some(bytes) => {
                let checkpoint = Self::from_bytes(&bytes)?;
                if checkpoint.partition != partition {
                    return Err(ArchiveError::Checkpoint(format!(
                        "checkpoint {} belongs to partition {}",
                        Self::name_for(partition),
                        checkpoint.partition
                    )));
                }
                Ok(Some(checkpoint))
            }
            None => Ok(None),
        }
    }

    pub fn save(&self, leases: &LeaseStore) -> Result<(), ArchiveError> {
        leases.put_checkpoint(&self.name(), &self.to_bytes()?)?;
        Ok(())
    }

    /// Every archiver checkpoint in the store, ordered by partition.
    pub fn list(leases: &LeaseStore) -> Result<Vec<Self>, ArchiveError> {
        let mut checkpoints = leases
            .list_checkpoints()?
            .into_iter()
            .filter(|(name, _)| name.starts_with(CHECKPOINT_PREFIX))
            .map(|(_, bytes)| Self::from_bytes(&bytes))
            .collect::<Result<Vec<_>, _>>()?;
        checkpoints.sort_by_key(|c| c.partition);
        Ok(checkpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_checkpoint_new() {
        let checkpoint = StreamCheckpoint::new(2);
        assert_eq!(checkpoint.partition, 2);
        assert_eq!(checkpoint.last_sequence, None);
        assert_eq!(checkpoint.processed_count, 0);
        assert_eq!(checkpoint.name(), "archiver:partition:2");
    }

    #[test]
    fn test_checkpoint_update() {
        let mut checkpoint = StreamCheckpoint::new(0);
        let original_time = checkpoint.last_committed_at;

        checkpoint.update(50, 10, 4);
        assert_eq!(checkpoint.last_sequence, Some(50));
        assert_eq!(checkpoint.processed_count, 10);
        assert_eq!(checkpoint.migrated_count, 4);
        assert!(checkpoint.last_committed_at >= original_time);

        checkpoint.update(60, 5, 5);
        assert_eq!(checkpoint.last_sequence, Some(60));
        assert_eq!(checkpoint.processed_count, 15);
        assert_eq!(checkpoint.migrated_count, 9);
    }

    #[test]
    fn test_checkpoint_json_format() {
        let checkpoint = StreamCheckpoint::new(1);
        let json_str = String::from_utf8(checkpoint.to_bytes().unwrap()).unwrap();

        assert!(json_str.contains("\"partition\":1"));
        assert!(json_str.contains("\"last_sequence\":null"));
        assert!(json_str.contains("\"created_at\":"));
    }

    #[test]
    fn test_save_load_list() {
        let temp_dir = TempDir::new().unwrap();
        let leases = LeaseStore::open(temp_dir.path()).unwrap();

        assert!(StreamCheckpoint::load(&leases, 0).unwrap().is_none());

        let mut checkpoint = StreamCheckpoint::new(0);
        checkpoint.update(7, 8, 3);
        checkpoint.save(&leases).unwrap();
        StreamCheckpoint::new(1).save(&leases).unwrap();
        leases.put_checkpoint("other:job", b"{}").unwrap();

        let loaded = StreamCheckpoint::load(&leases, 0).unwrap().unwrap();
        assert_eq!(loaded.last_sequence, Some(7));
        assert_eq!(loaded.migrated_count, 3);

        let all = StreamCheckpoint::list(&leases).unwrap();
        assert_eq!(all.iter().map(|c| c.partition).collect::<Vec<_>>(), vec![0, 1]);
    }
}
