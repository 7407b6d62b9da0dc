//! Column family definitions for RocksDB.
//!
//! Tier stores:
//! - records: Current record snapshot per id (Zstd compressed)
//! - changes: Per-partition change feed, trimmed after checkpoints
//! - meta: Store metadata (partition count, next sequence)
//!
//! Lease stores:
//! - leases: Partition ownership
//! - checkpoints: Stream consumption progress

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for record snapshots
pub const CF_RECORDS: &str = "records";

/// Column family name for the change feed
pub const CF_CHANGES: &str = "changes";

/// Column family name for store metadata
pub const CF_META: &str = "meta";

/// Column family name for partition leases
pub const CF_LEASES: &str = "leases";

/// Column family name for stream checkpoints
pub const CF_CHECKPOINTS: &str = "checkpoints";

/// Column families of a tier store
pub const TIER_CF_NAMES: &[&str] = &[CF_RECORDS, CF_CHANGES, CF_META];

/// Column families of a lease store
pub const LEASE_CF_NAMES: &[&str] = &[CF_LEASES, CF_CHECKPOINTS];

/// Options for record snapshots (point reads, compressed)
fn records_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Build tier store column family descriptors
pub fn build_tier_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_RECORDS, records_options()),
        // Not FIFO: unconsumed changes must never be dropped by compaction.
        ColumnFamilyDescriptor::new(CF_CHANGES, Options::default()),
        ColumnFamilyDescriptor::new(CF_META, Options::default()),
    ]
}

/// Build lease store column family descriptors
pub fn build_lease_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_LEASES, Options::default()),
        ColumnFamilyDescriptor::new(CF_CHECKPOINTS, Options::default()),
    ]
}
