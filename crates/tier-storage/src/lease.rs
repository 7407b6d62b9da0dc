//! Partition leases and stream checkpoints.
//!
//! A lease grants one archiver instance exclusive consumption of a change
//! feed partition until it expires. Checkpoints record how far a consumer
//! has committed. Both live in a store separate from the tiers so that
//! coordination state never mixes with records.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rocksdb::{IteratorMode, Options, DB};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::column_families::{
    build_lease_cf_descriptors, CF_CHECKPOINTS, CF_LEASES, LEASE_CF_NAMES,
};
use crate::error::StorageError;
use crate::keys::{CheckpointKey, LeaseKey};

/// Exclusive, expiring ownership of one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub partition: u32,
    pub owner: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub acquired_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Result of an acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseOutcome {
    /// Caller now owns the partition
    Acquired(Lease),
    /// Another owner holds an unexpired lease
    Held(Lease),
}

/// RocksDB-backed lease and checkpoint store.
pub struct LeaseStore {
    db: DB,
    /// Serializes read-modify-write of lease entries within this process
    guard: Mutex<()>,
}

impl LeaseStore {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening lease store at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let db = DB::open_cf_descriptors(&db_opts, path, build_lease_cf_descriptors())?;
        Ok(Self {
            db,
            guard: Mutex::new(()),
        })
    }

    /// Open without taking the write lock, for inspection.
    pub fn open_read_only(path: &Path) -> Result<Self, StorageError> {
        let db = DB::open_cf_for_read_only(&Options::default(), path, LEASE_CF_NAMES, false)?;
        Ok(Self {
            db,
            guard: Mutex::new(()),
        })
    }

    fn put_lease(&self, lease: &Lease) -> Result<(), StorageError> {
        let cf = self
            .db
            .cf_handle(CF_LEASES)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_LEASES.to_string()))?;
        let bytes = serde_json::to_vec(lease)?;
        self.db
            .put_cf(&cf, LeaseKey::new(lease.partition).to_bytes(), bytes)?;
        Ok(())
    }

    /// Current lease entry of a partition, expired or not.
    pub fn get_lease(&self, partition: u32) -> Result<Option<Lease>, StorageError> {
        let cf = self
            .db
            .cf_handle(CF_LEASES)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_LEASES.to_string()))?;

        match self.db.get_cf(&cf, LeaseKey::new(partition).to_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn acquire_lease(
        &self,
        partition: u32,
        owner: &str,
        ttl: Duration,
    ) -> Result<LeaseOutcome, StorageError> {
        self.acquire_lease_at(partition, owner, ttl, Utc::now())
    }

    /// Take the lease if it is free, expired, or already ours.
    pub fn acquire_lease_at(
        &self,
        partition: u32,
        owner: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<LeaseOutcome, StorageError> {
        let _guard = self.guard.lock().map_err(|_| StorageError::Poisoned)?;

        if let Some(current) = self.get_lease(partition)? {
            if current.owner != owner && !current.is_expired(now) {
                return Ok(LeaseOutcome::Held(current));
            }
        }

        let lease = Lease {
            partition,
            owner: owner.to_string(),
            acquired_at: now,
            expires_at: now + chrono_ttl(ttl),
        };
        self.put_lease(&lease)?;
        debug!(partition = partition, owner = owner, "Lease acquired");
        Ok(LeaseOutcome::Acquired(lease))
    }

    pub fn renew_lease(
        &self,
        partition: u32,
        owner: &str,
        ttl: Duration,
    ) -> Result<Option<Lease>, StorageError> {
        self.renew_lease_at(partition, owner, ttl, Utc::now())
    }

    /// Extend our lease. Returns `None` if it was lost to another owner,
    /// or expired and was taken over.
    pub fn renew_lease_at(
        &self,
        partition: u32,
        owner: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Lease>, StorageError> {
        let _guard = self.guard.lock().map_err(|_| StorageError::Poisoned)?;

        match self.get_lease(partition)? {
            Some(mut lease) if lease.owner == owner => {
                lease.expires_at = now + chrono_ttl(ttl);
                self.put_lease(&lease)?;
                Ok(Some(lease))
            }
            _ => Ok(None),
        }
    }

    /// Drop our lease. Returns false if we did not hold it.
    pub fn release_lease(&self, partition: u32, owner: &str) -> Result<bool, StorageError> {
        let _guard = self.guard.lock().map_err(|_| StorageError::Poisoned)?;

        match self.get_lease(partition)? {
            Some(lease) if lease.owner == owner => {
                let cf = self
                    .db
                    .cf_handle(CF_LEASES)
                    .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_LEASES.to_string()))?;
                self.db.delete_cf(&cf, LeaseKey::new(partition).to_bytes())?;
                debug!(partition = partition, owner = owner, "Lease released");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Store a checkpoint for crash recovery
    pub fn put_checkpoint(&self, name: &str, checkpoint_bytes: &[u8]) -> Result<(), StorageError> {
        let cf = self
            .db
            .cf_handle(CF_CHECKPOINTS)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_CHECKPOINTS.to_string()))?;

        self.db
            .put_cf(&cf, CheckpointKey::new(name).to_bytes(), checkpoint_bytes)?;
        Ok(())
    }

    pub fn get_checkpoint(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let cf = self
            .db
            .cf_handle(CF_CHECKPOINTS)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_CHECKPOINTS.to_string()))?;

        Ok(self.db.get_cf(&cf, CheckpointKey::new(name).to_bytes())?)
    }

    /// All checkpoints as (name, bytes), ordered by name.
    pub fn list_checkpoints(&self) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let cf = self
            .db
            .cf_handle(CF_CHECKPOINTS)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_CHECKPOINTS.to_string()))?;

        let mut results = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, value) = item?;
            let key = CheckpointKey::from_bytes(&key)?;
            results.push((key.name, value.to_vec()));
        }
        Ok(results)
    }
}

fn chrono_ttl(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365))
}
