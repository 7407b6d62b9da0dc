//! Continuous change-stream consumption, one worker per partition.
//!
//! A worker owns its partition through a lease, reads change events strictly
//! after its checkpoint, hands each batch to the [`Archiver`], and advances
//! the checkpoint only when the whole batch succeeded. A batch that failed
//! transiently is redelivered after a pause. Delivery is therefore
//! at-least-once, which the idempotent cold upsert absorbs. Fatal and
//! configuration errors stop the worker.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use tier_storage::{LeaseOutcome, LeaseStore, TierStore};
use tier_types::{ArchiverSettings, ChangeFeed};

use crate::archiver::{Archiver, BatchReport};
use crate::checkpoint::StreamCheckpoint;
use crate::error::ArchiveError;

/// Tuning for a partition worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum change events per batch
    pub batch_size: usize,
    /// Sleep when the partition has nothing new, or while its lease is held elsewhere
    pub poll_interval: Duration,
    /// Lease lifetime, renewed before and after every batch
    pub lease_ttl: Duration,
    /// Pause before redelivering a failed batch
    pub failure_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from(&ArchiverSettings::default())
    }
}

impl From<&ArchiverSettings> for WorkerConfig {
    fn from(settings: &ArchiverSettings) -> Self {
        Self {
            batch_size: settings.batch_size,
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            lease_ttl: Duration::from_secs(settings.lease_ttl_secs),
            failure_backoff: Duration::from_millis(settings.failure_backoff_ms),
        }
    }
}

impl WorkerConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_lease_ttl(mut self, lease_ttl: Duration) -> Self {
        self.lease_ttl = lease_ttl;
        self
    }

    pub fn with_failure_backoff(mut self, failure_backoff: Duration) -> Self {
        self.failure_backoff = failure_backoff;
        self
    }
}

/// Counters accumulated by one worker run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub partition: u32,
    /// Batches committed
    pub batches: u64,
    pub migrated: u64,
    pub fresh: u64,
    pub malformed: u64,
    pub retries: u64,
    /// Batches that failed and were redelivered
    pub failed_batches: u64,
    /// Checkpoint position when the worker stopped
    pub last_sequence: Option<u64>,
}

impl WorkerStats {
    fn record(&mut self, report: &BatchReport) {
        self.batches += 1;
        self.migrated += report.migrated as u64;
        self.fresh += report.fresh as u64;
        self.malformed += report.malformed as u64;
        self.retries += u64::from(report.retries);
        self.last_sequence = report.last_sequence.or(self.last_sequence);
    }
}

/// Consumer of one change feed partition.
pub struct PartitionWorker {
    partition: u32,
    owner: String,
    feed: Arc<dyn ChangeFeed>,
    archiver: Arc<Archiver>,
    leases: Arc<LeaseStore>,
    config: WorkerConfig,
    checkpoint: StreamCheckpoint,
    stats: WorkerStats,
    leased: bool,
}

impl PartitionWorker {
    pub fn new(
        partition: u32,
        feed: Arc<dyn ChangeFeed>,
        archiver: Arc<Archiver>,
        leases: Arc<LeaseStore>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            partition,
            owner: format!("archiver-{}", Ulid::new()),
            feed,
            archiver,
            leases,
            config,
            checkpoint: StreamCheckpoint::new(partition),
            stats: WorkerStats {
                partition,
                ..WorkerStats::default()
            },
            leased: false,
        }
    }

    /// Override the generated lease owner id.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn checkpoint(&self) -> &StreamCheckpoint {
        &self.checkpoint
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Try once to take the partition lease and load its checkpoint.
    ///
    /// Returns false if another live owner holds the lease.
    pub fn try_acquire(&mut self) -> Result<bool, ArchiveError> {
        let partitions = self.feed.partitions();
        if self.partition >= partitions {
            return Err(ArchiveError::InvalidPartition {
                partition: self.partition,
                partitions,
            });
        }

        match self
            .leases
            .acquire_lease(self.partition, &self.owner, self.config.lease_ttl)?
        {
            LeaseOutcome::Acquired(_) => {
                self.leased = true;
                self.checkpoint = StreamCheckpoint::load(&self.leases, self.partition)?
                    .unwrap_or_else(|| StreamCheckpoint::new(self.partition));
                self.stats.last_sequence = self.checkpoint.last_sequence;
                info!(
                    partition = self.partition,
                    owner = %self.owner,
                    last_sequence = ?self.checkpoint.last_sequence,
                    "Partition lease acquired"
                );
                Ok(true)
            }
            LeaseOutcome::Held(lease) => {
                debug!(
                    partition = self.partition,
                    holder = %lease.owner,
                    expires_at = %lease.expires_at,
                    "Partition leased elsewhere"
                );
                Ok(false)
            }
        }
    }

    /// Wait for the partition lease, polling until it is free.
    ///
    /// Returns false if cancelled first.
    pub async fn acquire(&mut self, cancel: &CancellationToken) -> Result<bool, ArchiveError> {
        loop {
            if self.try_acquire()? {
                return Ok(true);
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(false),
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    fn renew(&mut self) -> Result<(), ArchiveError> {
        if !self.leased {
            return Err(ArchiveError::LeaseLost {
                partition: self.partition,
            });
        }
        match self
            .leases
            .renew_lease(self.partition, &self.owner, self.config.lease_ttl)?
        {
            Some(_) => Ok(()),
            None => {
                self.leased = false;
                Err(ArchiveError::LeaseLost {
                    partition: self.partition,
                })
            }
        }
    }

    /// Read and process one batch.
    ///
    /// Returns `None` when the partition had nothing after the checkpoint.
    /// On error the checkpoint is unchanged, so the next call redelivers
    /// the same events.
    pub async fn poll_once(&mut self) -> Result<Option<BatchReport>, ArchiveError> {
        self.renew()?;

        let events = self
            .feed
            .read_changes(
                self.partition,
                self.checkpoint.last_sequence,
                self.config.batch_size,
            )
            .await?;

        if events.is_empty() {
            return Ok(None);
        }

        let report = self.archiver.process_batch(&events).await?;

        // A batch can outlast the lease; never commit on behalf of a new owner.
        self.renew()?;

        if let Some(last_sequence) = report.last_sequence {
            let mut next = self.checkpoint.clone();
            next.update(
                last_sequence,
                report.processed() as u64,
                report.migrated as u64,
            );
            next.save(&self.leases)?;
            self.checkpoint = next;

            info!(
                partition = self.partition,
                last_sequence = last_sequence,
                migrated = report.migrated,
                "Checkpoint advanced"
            );
        }
        self.stats.record(&report);

        Ok(Some(report))
    }

    /// Drop the lease if held.
    pub fn release(&mut self) -> Result<(), ArchiveError> {
        if self.leased {
            self.leases.release_lease(self.partition, &self.owner)?;
            self.leased = false;
            debug!(partition = self.partition, owner = %self.owner, "Partition lease released");
        }
        Ok(())
    }

    /// Consume the partition until cancelled, the lease is lost, or a
    /// terminal error occurs.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<WorkerStats, ArchiveError> {
        if !self.acquire(&cancel).await? {
            return Ok(self.stats);
        }

        let result = self.consume(&cancel).await;

        if let Err(e) = self.release() {
            warn!(partition = self.partition, error = %e, "Failed to release lease");
        }

        info!(
            partition = self.partition,
            batches = self.stats.batches,
            migrated = self.stats.migrated,
            failed_batches = self.stats.failed_batches,
            "Partition worker stopped"
        );

        result.map(|()| self.stats)
    }

    async fn consume(&mut self, cancel: &CancellationToken) -> Result<(), ArchiveError> {
        while !cancel.is_cancelled() {
            let pause = match self.poll_once().await {
                Ok(Some(_)) => None,
                Ok(None) => Some(self.config.poll_interval),
                Err(e) if e.is_terminal() => {
                    error!(partition = self.partition, error = %e, "Partition worker stopping");
                    return Err(e);
                }
                Err(e) => {
                    self.stats.failed_batches += 1;
                    warn!(
                        partition = self.partition,
                        last_sequence = ?self.checkpoint.last_sequence,
                        error = %e,
                        "Batch failed, will redeliver"
                    );
                    Some(self.config.failure_backoff)
                }
            };

            if let Some(pause) = pause {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }
        Ok(())
    }
}

/// Run one worker per partition until `cancel` fires.
///
/// A worker that fails stops the others. Every worker is joined before
/// returning. Stats come back in the order the partitions were given; the
/// first worker error, if any, is returned instead.
pub async fn run_partitions(
    partitions: &[u32],
    feed: Arc<dyn ChangeFeed>,
    archiver: Arc<Archiver>,
    leases: Arc<LeaseStore>,
    config: WorkerConfig,
    cancel: CancellationToken,
) -> Result<Vec<WorkerStats>, ArchiveError> {
    let feed_partitions = feed.partitions();
    if let Some(&partition) = partitions.iter().find(|&&p| p >= feed_partitions) {
        return Err(ArchiveError::InvalidPartition {
            partition,
            partitions: feed_partitions,
        });
    }

    info!(partitions = ?partitions, "Starting partition workers");

    // Child token: a failing worker stops its siblings, not the caller's token.
    let stop = cancel.child_token();

    let handles: Vec<_> = partitions
        .iter()
        .map(|&partition| {
            let worker = PartitionWorker::new(
                partition,
                feed.clone(),
                archiver.clone(),
                leases.clone(),
                config.clone(),
            );
            let stop = stop.clone();
            let handle = tokio::spawn(async move {
                let result = worker.run(stop.clone()).await;
                if result.is_err() {
                    stop.cancel();
                }
                result
            });
            (partition, handle)
        })
        .collect();

    let mut stats = Vec::with_capacity(handles.len());
    let mut first_error = None;

    for (partition, handle) in handles {
        match handle.await {
            Ok(Ok(worker_stats)) => stats.push(worker_stats),
            Ok(Err(e)) => {
                error!(partition = partition, error = %e, "Partition worker failed");
                first_error.get_or_insert(e);
            }
            Err(e) => {
                stop.cancel();
                error!(partition = partition, error = %e, "Partition worker panicked");
                first_error.get_or_insert(ArchiveError::Worker(e.to_string()));
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(stats),
    }
}

/// Delete change events a partition has already committed.
///
/// Returns count of deleted entries. Records are never touched.
pub fn trim_feed(
    store: &TierStore,
    leases: &LeaseStore,
    partition: u32,
) -> Result<usize, ArchiveError> {
    let Some(checkpoint) = StreamCheckpoint::load(leases, partition)? else {
        debug!(partition = partition, "No checkpoint, nothing to trim");
        return Ok(0);
    };
    let Some(last_sequence) = checkpoint.last_sequence else {
        return Ok(0);
    };

    let deleted = store.trim_changes(partition, last_sequence)?;
    info!(
        partition = partition,
        up_to_sequence = last_sequence,
        deleted = deleted,
        "Trimmed change feed"
    );
    Ok(deleted)
}
