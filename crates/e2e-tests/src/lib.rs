//! End-to-end test infrastructure for the tiered record store.
//!
//! Provides a shared TestHarness over real RocksDB hot, cold and lease
//! stores, plus a failure-injecting tier wrapper for outage scenarios.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Months, Utc};

use tier_archiver::{Archiver, PartitionWorker, RetryConfig, WorkerConfig};
use tier_resolver::Resolver;
use tier_storage::{LeaseStore, TierOptions, TierStore};
use tier_types::{
    Lookup, Record, RecordReader, RecordWriter, RetentionPeriod, Tier, TierError, TierKind,
};

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub hot: Arc<TierStore>,
    pub cold: Arc<TierStore>,
    pub leases: Arc<LeaseStore>,
    pub retention: RetentionPeriod,
}

impl TestHarness {
    /// Harness with a single-partition hot tier.
    pub fn new() -> Self {
        Self::with_partitions(1)
    }

    pub fn with_partitions(partitions: u32) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");

        let hot = TierStore::open(
            &temp_dir.path().join("hot"),
            TierOptions::hot("hot", partitions),
        )
        .expect("Failed to open hot tier");
        let cold = TierStore::open(&temp_dir.path().join("cold"), TierOptions::cold("cold"))
            .expect("Failed to open cold tier");
        let leases =
            LeaseStore::open(&temp_dir.path().join("leases")).expect("Failed to open lease store");

        Self {
            _temp_dir: temp_dir,
            hot: Arc::new(hot),
            cold: Arc::new(cold),
            leases: Arc::new(leases),
            retention: RetentionPeriod::Months(3),
        }
    }

    /// Archiver writing into the harness cold tier.
    pub fn archiver(&self) -> Arc<Archiver> {
        self.archiver_with(self.cold.clone())
    }

    /// Archiver writing through a custom cold-tier handle.
    pub fn archiver_with(&self, cold: Arc<dyn RecordWriter>) -> Arc<Archiver> {
        Arc::new(Archiver::new(cold, self.retention).with_retry(fast_retry()))
    }

    pub fn worker(&self, partition: u32, archiver: Arc<Archiver>) -> PartitionWorker {
        PartitionWorker::new(
            partition,
            self.hot.clone(),
            archiver,
            self.leases.clone(),
            worker_config(),
        )
    }

    pub fn resolver(&self) -> Resolver {
        Resolver::new(self.hot.clone(), self.cold.clone())
    }

    /// Write records into the hot tier, as the application would.
    pub fn write_hot(&self, records: &[Record]) {
        for record in records {
            self.hot.put_record(record).expect("Failed to write hot record");
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Retry policy with millisecond backoff.
pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        initial_interval: Duration::from_millis(1),
        max_interval: Duration::from_millis(5),
        max_elapsed: Duration::from_secs(5),
    }
}

/// Worker config with short sleeps.
pub fn worker_config() -> WorkerConfig {
    WorkerConfig::default()
        .with_batch_size(10)
        .with_poll_interval(Duration::from_millis(10))
        .with_failure_backoff(Duration::from_millis(10))
}

/// `now - months`, for building aged and fresh records.
pub fn months_ago(months: u32) -> DateTime<Utc> {
    Utc::now()
        .checked_sub_months(Months::new(months))
        .expect("date out of range")
}

/// Record with a timestamp and a small payload.
pub fn record_at(id: &str, timestamp: DateTime<Utc>) -> Record {
    Record::new(id)
        .with_timestamp(timestamp)
        .with_field("customer", format!("cust-{}", id))
        .with_field("amount", 125)
        .with_field("tags", serde_json::json!(["invoice", "eu"]))
}

/// Tier wrapper that fails on demand and counts calls.
pub struct FlakyTier {
    inner: Arc<TierStore>,
    read_failures: Mutex<VecDeque<TierError>>,
    write_failures: Mutex<VecDeque<TierError>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl FlakyTier {
    pub fn new(inner: Arc<TierStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            read_failures: Mutex::new(VecDeque::new()),
            write_failures: Mutex::new(VecDeque::new()),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        })
    }

    /// Fail the next `count` reads with `err`.
    pub fn fail_reads(&self, err: TierError, count: usize) {
        let mut failures = self.read_failures.lock().expect("lock poisoned");
        failures.extend(std::iter::repeat(err).take(count));
    }

    /// Fail the next `count` writes with `err`.
    pub fn fail_writes(&self, err: TierError, count: usize) {
        let mut failures = self.write_failures.lock().expect("lock poisoned");
        failures.extend(std::iter::repeat(err).take(count));
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl Tier for FlakyTier {
    fn kind(&self) -> TierKind {
        self.inner.kind()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[async_trait]
impl RecordReader for FlakyTier {
    async fn read(&self, id: &str) -> Result<Lookup, TierError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let failure = self.read_failures.lock().expect("lock poisoned").pop_front();
        match failure {
            Some(err) => Err(err),
            None => self.inner.read(id).await,
        }
    }
}

#[async_trait]
impl RecordWriter for FlakyTier {
    async fn upsert(&self, record: &Record) -> Result<(), TierError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let failure = self.write_failures.lock().expect("lock poisoned").pop_front();
        match failure {
            Some(err) => Err(err),
            None => self.inner.upsert(record).await,
        }
    }
}
