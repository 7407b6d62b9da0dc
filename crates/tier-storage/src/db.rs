//! RocksDB wrapper for one storage tier.
//!
//! Provides:
//! - Database open with column family setup and partition-count check
//! - Atomic record + change feed writes via WriteBatch
//! - Point reads by id
//! - Ordered per-partition change feed reads and trimming
//! - Follower handles (RocksDB secondary instances) that tail a store
//!   another process writes to

use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use tier_types::{partition_for, ChangeEvent, Record, TierKind};

use crate::column_families::{
    build_tier_cf_descriptors, CF_CHANGES, CF_META, CF_RECORDS, TIER_CF_NAMES,
};
use crate::error::StorageError;
use crate::keys::{ChangeKey, RecordKey};

const META_PARTITIONS: &[u8] = b"partitions";
const META_NEXT_SEQUENCE: &[u8] = b"next_sequence";

/// How a store is opened.
#[derive(Debug, Clone)]
pub struct TierOptions {
    pub kind: TierKind,
    pub name: String,
    /// Key-space partitions of the change feed
    pub partitions: u32,
    /// Whether upserts append to the change feed
    pub change_feed: bool,
}

impl TierOptions {
    /// Hot tier: change feed enabled.
    pub fn hot(name: impl Into<String>, partitions: u32) -> Self {
        Self {
            kind: TierKind::Hot,
            name: name.into(),
            partitions: partitions.max(1),
            change_feed: true,
        }
    }

    /// Cold tier: no change feed, single partition.
    pub fn cold(name: impl Into<String>) -> Self {
        Self {
            kind: TierKind::Cold,
            name: name.into(),
            partitions: 1,
            change_feed: false,
        }
    }
}

/// One tier's record store and change feed.
pub struct TierStore {
    db: DB,
    options: TierOptions,
    /// Next change sequence. Held across the write so that commit order
    /// equals sequence order.
    write_lock: Mutex<u64>,
    /// Secondary instance: catches up with the primary before reads
    follower: bool,
}

impl TierStore {
    /// Open storage at the given path, creating if necessary.
    ///
    /// The partition count is persisted on first open; reopening with a
    /// different count fails with [`StorageError::PartitionMismatch`].
    pub fn open(path: &Path, options: TierOptions) -> Result<Self, StorageError> {
        info!(tier = %options.name, kind = %options.kind, "Opening tier store at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(4);

        let db = DB::open_cf_descriptors(&db_opts, path, build_tier_cf_descriptors())?;

        Self::check_partitions(&db, options.partitions)?;
        let next_sequence = Self::load_next_sequence(&db)?;

        Ok(Self {
            db,
            options,
            write_lock: Mutex::new(next_sequence),
            follower: false,
        })
    }

    /// Open an existing store without taking its write lock.
    ///
    /// Sees the data as of open time. Used by inspection commands that run
    /// next to a live archiver.
    pub fn open_read_only(path: &Path, options: TierOptions) -> Result<Self, StorageError> {
        info!(tier = %options.name, "Opening tier store read-only at {:?}", path);

        let db = DB::open_cf_for_read_only(&Options::default(), path, TIER_CF_NAMES, false)?;

        Self::verify_partitions(&db, options.partitions)?;
        let next_sequence = Self::load_next_sequence(&db)?;

        Ok(Self {
            db,
            options,
            write_lock: Mutex::new(next_sequence),
            follower: false,
        })
    }

    /// Follow a store owned by another process, as a RocksDB secondary.
    ///
    /// The primary at `path` keeps accepting writes; every read through this
    /// handle first catches up with it, so records written after open become
    /// visible. `secondary_path` holds the follower's own logs. Writes fail
    /// with [`StorageError::Follower`].
    pub fn open_secondary(
        path: &Path,
        secondary_path: &Path,
        options: TierOptions,
    ) -> Result<Self, StorageError> {
        info!(
            tier = %options.name,
            "Following tier store at {:?} (secondary at {:?})", path, secondary_path
        );

        let mut db_opts = Options::default();
        // required for secondary instances
        db_opts.set_max_open_files(-1);

        let db = DB::open_cf_as_secondary(&db_opts, path, secondary_path, TIER_CF_NAMES)?;
        db.try_catch_up_with_primary()?;

        Self::verify_partitions(&db, options.partitions)?;
        let next_sequence = Self::load_next_sequence(&db)?;

        Ok(Self {
            db,
            options,
            write_lock: Mutex::new(next_sequence),
            follower: true,
        })
    }

    /// Check the persisted partition count without writing it.
    fn verify_partitions(db: &DB, requested: u32) -> Result<(), StorageError> {
        let cf = db
            .cf_handle(CF_META)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_META.to_string()))?;
        if let Some(bytes) = db.get_cf(&cf, META_PARTITIONS)? {
            let stored = decode_u32(&bytes)?;
            if stored != requested {
                return Err(StorageError::PartitionMismatch { stored, requested });
            }
        }
        Ok(())
    }

    fn check_partitions(db: &DB, requested: u32) -> Result<(), StorageError> {
        let cf = db
            .cf_handle(CF_META)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_META.to_string()))?;

        match db.get_cf(&cf, META_PARTITIONS)? {
            Some(bytes) => {
                let stored = decode_u32(&bytes)?;
                if stored != requested {
                    return Err(StorageError::PartitionMismatch { stored, requested });
                }
            }
            None => {
                db.put_cf(&cf, META_PARTITIONS, requested.to_be_bytes())?;
            }
        }
        Ok(())
    }

    fn load_next_sequence(db: &DB) -> Result<u64, StorageError> {
        let cf = db
            .cf_handle(CF_META)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_META.to_string()))?;

        match db.get_cf(&cf, META_NEXT_SEQUENCE)? {
            Some(bytes) => decode_u64(&bytes),
            None => Ok(0),
        }
    }

    pub fn kind(&self) -> TierKind {
        self.options.kind
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn partitions(&self) -> u32 {
        self.options.partitions
    }

    pub fn is_follower(&self) -> bool {
        self.follower
    }

    fn catch_up(&self) -> Result<(), StorageError> {
        if self.follower {
            self.db.try_catch_up_with_primary()?;
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<(), StorageError> {
        if self.follower {
            return Err(StorageError::Follower(self.options.name.clone()));
        }
        Ok(())
    }

    /// Upsert a record, appending a change event when the feed is enabled.
    ///
    /// Returns the change sequence, or `None` for stores without a feed.
    pub fn put_record(&self, record: &Record) -> Result<Option<u64>, StorageError> {
        self.ensure_writable()?;
        record.validate()?;

        let records_cf = self
            .db
            .cf_handle(CF_RECORDS)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_RECORDS.to_string()))?;
        let record_bytes = record.to_bytes()?;

        if !self.options.change_feed {
            self.db
                .put_cf(&records_cf, RecordKey::new(&record.id).to_bytes(), &record_bytes)?;
            debug!(tier = %self.options.name, id = %record.id, "Upserted record");
            return Ok(None);
        }

        let changes_cf = self
            .db
            .cf_handle(CF_CHANGES)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_CHANGES.to_string()))?;
        let meta_cf = self
            .db
            .cf_handle(CF_META)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_META.to_string()))?;

        let mut next_sequence = self.write_lock.lock().map_err(|_| StorageError::Poisoned)?;
        let sequence = *next_sequence;
        let partition = partition_for(&record.id, self.options.partitions);
        let event = ChangeEvent::new(partition, sequence, record.clone());

        // Atomic write: record + change + sequence high-water mark
        let mut batch = WriteBatch::default();
        batch.put_cf(&records_cf, RecordKey::new(&record.id).to_bytes(), &record_bytes);
        batch.put_cf(
            &changes_cf,
            ChangeKey::new(partition, sequence).to_bytes(),
            event.to_bytes()?,
        );
        batch.put_cf(&meta_cf, META_NEXT_SEQUENCE, (sequence + 1).to_be_bytes());
        self.db.write(batch)?;

        *next_sequence = sequence + 1;
        debug!(
            tier = %self.options.name,
            id = %record.id,
            partition = partition,
            sequence = sequence,
            "Upserted record"
        );

        Ok(Some(sequence))
    }

    /// Get a record by id
    pub fn get_record(&self, id: &str) -> Result<Option<Record>, StorageError> {
        self.catch_up()?;
        let cf = self
            .db
            .cf_handle(CF_RECORDS)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_RECORDS.to_string()))?;

        match self.db.get_cf(&cf, RecordKey::new(id).to_bytes())? {
            Some(bytes) => Ok(Some(Record::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn check_partition(&self, partition: u32) -> Result<(), StorageError> {
        if partition >= self.options.partitions {
            return Err(StorageError::PartitionOutOfRange {
                partition,
                partitions: self.options.partitions,
            });
        }
        Ok(())
    }

    /// Read change events of one partition with sequence > `after`.
    ///
    /// Returns events in sequence order, at most `limit` of them.
    pub fn get_changes(
        &self,
        partition: u32,
        after: Option<u64>,
        limit: usize,
    ) -> Result<Vec<ChangeEvent>, StorageError> {
        self.check_partition(partition)?;
        self.catch_up()?;
        let cf = self
            .db
            .cf_handle(CF_CHANGES)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_CHANGES.to_string()))?;

        let prefix = ChangeKey::partition_prefix(partition);
        let start = match after {
            Some(sequence) => ChangeKey::new(partition, sequence.saturating_add(1)).to_bytes(),
            None => prefix.clone(),
        };

        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&start, Direction::Forward));

        let mut results = Vec::new();
        for item in iter {
            if results.len() >= limit {
                break;
            }
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            results.push(ChangeEvent::from_bytes(&value)?);
        }

        Ok(results)
    }

    /// Delete change events of a partition up to and including `up_to_sequence`.
    ///
    /// Returns count of deleted entries.
    pub fn trim_changes(&self, partition: u32, up_to_sequence: u64) -> Result<usize, StorageError> {
        self.ensure_writable()?;
        self.check_partition(partition)?;
        let cf = self
            .db
            .cf_handle(CF_CHANGES)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_CHANGES.to_string()))?;

        let prefix = ChangeKey::partition_prefix(partition);
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward));
        let mut batch = WriteBatch::default();
        let mut count = 0;

        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let change_key = ChangeKey::from_bytes(&key)?;
            if change_key.sequence > up_to_sequence {
                break;
            }
            batch.delete_cf(&cf, &key);
            count += 1;
        }

        if count > 0 {
            self.db.write(batch)?;
            debug!(
                tier = %self.options.name,
                partition = partition,
                up_to_sequence = up_to_sequence,
                deleted = count,
                "Trimmed change feed"
            );
        }

        Ok(count)
    }

    /// Flush all column families to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        for cf_name in TIER_CF_NAMES {
            if let Some(cf) = self.db.cf_handle(cf_name) {
                self.db.flush_cf(&cf)?;
            }
        }
        Ok(())
    }

    /// Get store statistics.
    pub fn get_stats(&self) -> Result<TierStats, StorageError> {
        let mut stats = TierStats {
            partitions: self.options.partitions,
            ..TierStats::default()
        };

        if let Some(cf) = self.db.cf_handle(CF_RECORDS) {
            stats.record_count = self.count_cf_entries(cf)?;
        }
        if let Some(cf) = self.db.cf_handle(CF_CHANGES) {
            stats.pending_changes = self.count_cf_entries(cf)?;
        }
        stats.next_sequence = *self.write_lock.lock().map_err(|_| StorageError::Poisoned)?;
        stats.disk_usage_bytes = self.get_disk_usage();

        Ok(stats)
    }

    fn count_cf_entries(&self, cf: &rocksdb::ColumnFamily) -> Result<u64, StorageError> {
        let mut count = 0u64;
        let iter = self.db.iterator_cf(cf, IteratorMode::Start);
        for item in iter {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn get_disk_usage(&self) -> u64 {
        let mut total_size = 0u64;
        if let Ok(entries) = std::fs::read_dir(self.db.path()) {
            for entry in entries.flatten() {
                if let Ok(metadata) = entry.metadata() {
                    total_size += metadata.len();
                }
            }
        }
        total_size
    }
}

/// Statistics about a tier store.
#[derive(Debug, Default, Clone)]
pub struct TierStats {
    /// Number of records stored
    pub record_count: u64,
    /// Change events not yet trimmed
    pub pending_changes: u64,
    /// Sequence the next change will receive
    pub next_sequence: u64,
    /// Change feed partitions
    pub partitions: u32,
    /// Total disk usage in bytes
    pub disk_usage_bytes: u64,
}

fn decode_u32(bytes: &[u8]) -> Result<u32, StorageError> {
    let arr: [u8; 4] = bytes
        .try_into()
        .map_err(|_| StorageError::Serialization(format!("expected 4 bytes, got {}", bytes.len())))?;
    Ok(u32::from_be_bytes(arr))
}

fn decode_u64(bytes: &[u8]) -> Result<u64, StorageError> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StorageError::Serialization(format!("expected 8 bytes, got {}", bytes.len())))?;
    Ok(u64::from_be_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_hot_store(partitions: u32) -> (TierStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = TierStore::open(temp_dir.path(), TierOptions::hot("hot", partitions)).unwrap();
        (store, temp_dir)
    }

    fn record(id: &str) -> Record {
        Record::new(id)
            .with_field("timestamp", "2024-01-15T10:00:00Z")
            .with_field("amount", 10)
    }

    #[test]
    fn test_open_creates_column_families() {
        let (store, _temp) = create_hot_store(4);
        for cf_name in TIER_CF_NAMES {
            assert!(
                store.db.cf_handle(cf_name).is_some(),
                "CF {} should exist",
                cf_name
            );
        }
    }

    #[test]
    fn test_put_and_get_record() {
        let (store, _temp) = create_hot_store(4);

        let seq = store.put_record(&record("A1")).unwrap();
        assert_eq!(seq, Some(0));

        let fetched = store.get_record("A1").unwrap().unwrap();
        assert_eq!(fetched, record("A1"));
        assert!(store.get_record("missing").unwrap().is_none());
    }

    #[test]
    fn test_upsert_overwrites() {
        let (store, _temp) = create_hot_store(1);

        store.put_record(&record("A1")).unwrap();
        let updated = record("A1").with_field("amount", 99);
        store.put_record(&updated).unwrap();

        assert_eq!(store.get_record("A1").unwrap().unwrap(), updated);
        assert_eq!(store.get_stats().unwrap().record_count, 1);
        // both writes are visible on the feed
        assert_eq!(store.get_changes(0, None, 10).unwrap().len(), 2);
    }

    #[test]
    fn test_empty_id_rejected() {
        let (store, _temp) = create_hot_store(1);
        let err = store.put_record(&Record::new("")).unwrap_err();
        assert!(matches!(err, StorageError::InvalidRecord(_)));
    }

    #[test]
    fn test_changes_routed_by_partition() {
        let (store, _temp) = create_hot_store(4);

        for i in 0..20 {
            store.put_record(&record(&format!("id-{}", i))).unwrap();
        }

        let mut total = 0;
        for partition in 0..4 {
            let changes = store.get_changes(partition, None, 100).unwrap();
            for change in &changes {
                assert_eq!(change.partition, partition);
                assert_eq!(partition_for(&change.record.id, 4), partition);
            }
            // ordered by sequence
            assert!(changes.windows(2).all(|w| w[0].sequence < w[1].sequence));
            total += changes.len();
        }
        assert_eq!(total, 20);
    }

    #[test]
    fn test_get_changes_after_and_limit() {
        let (store, _temp) = create_hot_store(1);
        for i in 0..5 {
            store.put_record(&record(&format!("r{}", i))).unwrap();
        }

        let first = store.get_changes(0, None, 3).unwrap();
        assert_eq!(
            first.iter().map(|c| c.sequence).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );

        let rest = store.get_changes(0, Some(2), 10).unwrap();
        assert_eq!(
            rest.iter().map(|c| c.sequence).collect::<Vec<_>>(),
            vec![3, 4]
        );

        assert!(store.get_changes(0, Some(4), 10).unwrap().is_empty());
    }

    #[test]
    fn test_partition_out_of_range() {
        let (store, _temp) = create_hot_store(2);
        let err = store.get_changes(2, None, 10).unwrap_err();
        assert!(matches!(err, StorageError::PartitionOutOfRange { .. }));
    }

    #[test]
    fn test_trim_changes() {
        let (store, _temp) = create_hot_store(1);
        for i in 0..5 {
            store.put_record(&record(&format!("r{}", i))).unwrap();
        }

        let deleted = store.trim_changes(0, 2).unwrap();
        assert_eq!(deleted, 3);

        let remaining = store.get_changes(0, None, 10).unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].sequence, 3);

        // records are untouched by trimming
        assert_eq!(store.get_stats().unwrap().record_count, 5);
    }

    #[test]
    fn test_sequence_survives_trim_and_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = TierStore::open(temp_dir.path(), TierOptions::hot("hot", 1)).unwrap();
            for i in 0..3 {
                store.put_record(&record(&format!("r{}", i))).unwrap();
            }
            store.trim_changes(0, 2).unwrap();
        }

        let store = TierStore::open(temp_dir.path(), TierOptions::hot("hot", 1)).unwrap();
        let seq = store.put_record(&record("r3")).unwrap();
        assert_eq!(seq, Some(3));
    }

    #[test]
    fn test_partition_mismatch_on_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            TierStore::open(temp_dir.path(), TierOptions::hot("hot", 4)).unwrap();
        }
        let result = TierStore::open(temp_dir.path(), TierOptions::hot("hot", 8));
        assert!(matches!(
            result,
            Err(StorageError::PartitionMismatch {
                stored: 4,
                requested: 8
            })
        ));
    }

    #[test]
    fn test_open_read_only() {
        let temp_dir = TempDir::new().unwrap();
        let writer = TierStore::open(temp_dir.path(), TierOptions::hot("hot", 2)).unwrap();
        writer.put_record(&record("A1")).unwrap();
        writer.flush().unwrap();

        // the writable handle stays open
        let reader =
            TierStore::open_read_only(temp_dir.path(), TierOptions::hot("hot", 2)).unwrap();
        assert!(reader.get_record("A1").unwrap().is_some());
        assert_eq!(reader.get_stats().unwrap().next_sequence, 1);
        assert!(reader.put_record(&record("B2")).is_err());
    }

    #[test]
    fn test_secondary_follows_later_writes() {
        let temp_dir = TempDir::new().unwrap();
        let follower_dir = TempDir::new().unwrap();
        let writer = TierStore::open(temp_dir.path(), TierOptions::hot("hot", 2)).unwrap();

        let follower = TierStore::open_secondary(
            temp_dir.path(),
            follower_dir.path(),
            TierOptions::hot("hot", 2),
        )
        .unwrap();
        assert!(follower.is_follower());
        assert!(follower.get_record("A1").unwrap().is_none());

        // written after the follower opened, never flushed
        writer.put_record(&record("A1")).unwrap();
        writer.put_record(&record("B2")).unwrap();

        assert!(follower.get_record("A1").unwrap().is_some());
        let seen: usize = (0..2)
            .map(|p| follower.get_changes(p, None, 10).unwrap().len())
            .sum();
        assert_eq!(seen, 2);

        assert!(matches!(
            follower.put_record(&record("C3")),
            Err(StorageError::Follower(_))
        ));
        assert!(matches!(
            follower.trim_changes(0, 10),
            Err(StorageError::Follower(_))
        ));
    }

    #[test]
    fn test_secondary_partition_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let follower_dir = TempDir::new().unwrap();
        let _writer = TierStore::open(temp_dir.path(), TierOptions::hot("hot", 4)).unwrap();

        let result = TierStore::open_secondary(
            temp_dir.path(),
            follower_dir.path(),
            TierOptions::hot("hot", 2),
        );
        assert!(matches!(
            result,
            Err(StorageError::PartitionMismatch {
                stored: 4,
                requested: 2
            })
        ));
    }

    #[test]
    fn test_cold_store_has_no_feed() {
        let temp_dir = TempDir::new().unwrap();
        let store = TierStore::open(temp_dir.path(), TierOptions::cold("cold")).unwrap();

        assert_eq!(store.put_record(&record("A1")).unwrap(), None);
        assert!(store.get_changes(0, None, 10).unwrap().is_empty());
        assert!(store.get_record("A1").unwrap().is_some());
    }

    #[test]
    fn test_stats() {
        let (store, _temp) = create_hot_store(2);
        store.put_record(&record("a")).unwrap();
        store.put_record(&record("b")).unwrap();

        let stats = store.get_stats().unwrap();
        assert_eq!(stats.record_count, 2);
        assert_eq!(stats.pending_changes, 2);
        assert_eq!(stats.next_sequence, 2);
        assert_eq!(stats.partitions, 2);
    }
}
