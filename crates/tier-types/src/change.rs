//! Change events emitted by a tier's change feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::Record;

/// A committed insert or update, carrying the full record snapshot.
///
/// Delivered at-least-once. `sequence` is monotonic within the emitting store,
/// so events of one partition are ordered by it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Key-space partition the record hashes to
    pub partition: u32,

    /// Commit sequence number
    pub sequence: u64,

    /// When the change was committed (milliseconds since epoch for JSON compatibility)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub committed_at: DateTime<Utc>,

    /// Record snapshot after the change
    pub record: Record,
}

impl ChangeEvent {
    pub fn new(partition: u32, sequence: u64, record: Record) -> Self {
        Self {
            partition,
            sequence,
            committed_at: Utc::now(),
            record,
        }
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
