//! Tier access contracts.
//!
//! The archiver and resolver only see these traits. Concrete handles are
//! constructed by the hosting process and injected as trait objects.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::change::ChangeEvent;
use crate::error::TierError;
use crate::record::Record;

/// Which tier a store plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    /// Low-latency storage for recent records
    Hot,
    /// Cheaper storage for aged records
    Cold,
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TierKind::Hot => write!(f, "hot"),
            TierKind::Cold => write!(f, "cold"),
        }
    }
}

/// Outcome of a point read that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found(Record),
    NotFound,
}

impl Lookup {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn into_option(self) -> Option<Record> {
        match self {
            Lookup::Found(record) => Some(record),
            Lookup::NotFound => None,
        }
    }
}

impl From<Option<Record>> for Lookup {
    fn from(value: Option<Record>) -> Self {
        match value {
            Some(record) => Lookup::Found(record),
            None => Lookup::NotFound,
        }
    }
}

/// Identity of a tier handle, used in logs and errors.
pub trait Tier: Send + Sync {
    fn kind(&self) -> TierKind;

    /// Configured tier name (e.g. "hot", "billing-cold")
    fn name(&self) -> &str;
}

/// Exact-match point reads by record id.
#[async_trait]
pub trait RecordReader: Tier {
    async fn read(&self, id: &str) -> Result<Lookup, TierError>;
}

/// Idempotent writes keyed by record id.
#[async_trait]
pub trait RecordWriter: Tier {
    /// Insert if absent, overwrite if present.
    async fn upsert(&self, record: &Record) -> Result<(), TierError>;
}

/// Durable, ordered, per-partition change stream.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Number of key-space partitions in this feed.
    fn partitions(&self) -> u32;

    /// Up to `limit` events of `partition` with sequence strictly greater
    /// than `after` (or from the start when `after` is `None`), in order.
    async fn read_changes(
        &self,
        partition: u32,
        after: Option<u64>,
        limit: usize,
    ) -> Result<Vec<ChangeEvent>, TierError>;
}
