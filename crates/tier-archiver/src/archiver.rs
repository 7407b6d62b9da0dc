//! Batch migration of aged records.
//!
//! The archiver receives change events from the hot tier's feed and copies
//! every record older than the retention period into the cold tier. It only
//! writes to cold storage; hot-tier expiry is handled outside this crate.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use tier_types::{ChangeEvent, RecordWriter, RetentionPeriod};

use crate::error::ArchiveError;
use crate::retry::{upsert_with_retry, RetryConfig};

/// Outcome of one batch.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Records written to the cold tier
    pub migrated: usize,
    /// Records younger than the retention period
    pub fresh: usize,
    /// Records skipped for a missing or unparseable timestamp
    pub malformed: usize,
    /// Transient cold-tier failures that were retried
    pub retries: u32,
    /// Sequence of the last event in the batch
    pub last_sequence: Option<u64>,
}

impl BatchReport {
    /// Total events handled.
    pub fn processed(&self) -> usize {
        self.migrated + self.fresh + self.malformed
    }
}

/// Migrates aged records into the cold tier.
pub struct Archiver {
    cold: Arc<dyn RecordWriter>,
    retention: RetentionPeriod,
    retry: RetryConfig,
}

impl Archiver {
    pub fn new(cold: Arc<dyn RecordWriter>, retention: RetentionPeriod) -> Self {
        Self {
            cold,
            retention,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn retention(&self) -> RetentionPeriod {
        self.retention
    }

    pub async fn process_batch(&self, events: &[ChangeEvent]) -> Result<BatchReport, ArchiveError> {
        self.process_batch_at(events, Utc::now()).await
    }

    /// Process a batch against an explicit clock.
    ///
    /// Events are handled in delivery order. A malformed record is logged
    /// and skipped without affecting the rest. A cold-tier failure that
    /// survives retry aborts the batch; records written before it stay
    /// written, and redelivery rewrites them idempotently.
    pub async fn process_batch_at(
        &self,
        events: &[ChangeEvent],
        now: DateTime<Utc>,
    ) -> Result<BatchReport, ArchiveError> {
        let mut report = BatchReport::default();
        if events.is_empty() {
            return Ok(report);
        }

        for event in events {
            let record = &event.record;
            report.last_sequence = Some(event.sequence);

            let timestamp = match record.timestamp() {
                Ok(ts) => ts,
                Err(e) => {
                    warn!(
                        id = %record.id,
                        partition = event.partition,
                        sequence = event.sequence,
                        error = %e,
                        "Skipping record with unusable timestamp"
                    );
                    report.malformed += 1;
                    continue;
                }
            };

            if !self.retention.is_aged(timestamp, now) {
                report.fresh += 1;
                continue;
            }

            report.retries += upsert_with_retry(self.cold.as_ref(), record, &self.retry).await?;
            report.migrated += 1;
            debug!(id = %record.id, sequence = event.sequence, "Migrated record");
        }

        info!(
            events = events.len(),
            migrated = report.migrated,
            fresh = report.fresh,
            malformed = report.malformed,
            retries = report.retries,
            "Batch processed"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryTier;
    use chrono::TimeZone;
    use std::time::Duration;
    use tier_types::{Record, TierError};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn event(sequence: u64, record: Record) -> ChangeEvent {
        ChangeEvent::new(0, sequence, record)
    }

    fn aged(id: &str) -> Record {
        Record::new(id)
            .with_field("timestamp", "2024-01-15T10:00:00Z")
            .with_field("amount", 42)
    }

    fn fresh(id: &str) -> Record {
        Record::new(id).with_field("timestamp", "2024-05-20")
    }

    fn archiver(cold: Arc<MemoryTier>) -> Archiver {
        Archiver::new(cold, RetentionPeriod::Months(3)).with_retry(RetryConfig {
            max_retries: 3,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(2),
            max_elapsed: Duration::from_secs(5),
        })
    }

    #[tokio::test]
    async fn test_aged_record_migrated() {
        let cold = Arc::new(MemoryTier::cold());
        let archiver = archiver(cold.clone());

        let report = archiver
            .process_batch_at(&[event(0, aged("A1"))], now())
            .await
            .unwrap();

        assert_eq!(report.migrated, 1);
        assert_eq!(report.last_sequence, Some(0));
        // every field carried over
        assert_eq!(cold.get("A1"), Some(aged("A1")));
    }

    #[tokio::test]
    async fn test_fresh_record_skipped() {
        let cold = Arc::new(MemoryTier::cold());
        let archiver = archiver(cold.clone());

        let report = archiver
            .process_batch_at(&[event(0, fresh("B2"))], now())
            .await
            .unwrap();

        assert_eq!(report.fresh, 1);
        assert_eq!(report.migrated, 0);
        assert_eq!(cold.upsert_calls(), 0);
    }

    #[tokio::test]
    async fn test_boundary_is_aged() {
        let cold = Arc::new(MemoryTier::cold());
        let archiver = archiver(cold.clone());
        let record = Record::new("edge").with_field("timestamp", "2024-03-01T00:00:00Z");

        let report = archiver
            .process_batch_at(&[event(0, record)], now())
            .await
            .unwrap();
        assert_eq!(report.migrated, 1);
    }

    #[tokio::test]
    async fn test_just_inside_retention_is_fresh() {
        let cold = Arc::new(MemoryTier::cold());
        let archiver = archiver(cold.clone());
        let record = Record::new("edge").with_field("timestamp", "2024-03-01T00:00:01Z");
        assert!(!archiver
            .retention()
            .is_aged(record.timestamp().unwrap(), now()));

        let report = archiver
            .process_batch_at(&[event(0, record)], now())
            .await
            .unwrap();
        assert_eq!(report.fresh, 1);
        assert_eq!(cold.upsert_calls(), 0);
    }

    #[tokio::test]
    async fn test_malformed_does_not_block_batch() {
        let cold = Arc::new(MemoryTier::cold());
        let archiver = archiver(cold.clone());

        let events = vec![
            event(0, Record::new("C3").with_field("timestamp", "not-a-date")),
            event(1, Record::new("D4")),
            event(2, aged("E5")),
        ];
        let report = archiver.process_batch_at(&events, now()).await.unwrap();

        assert_eq!(report.malformed, 2);
        assert_eq!(report.migrated, 1);
        assert_eq!(report.processed(), 3);
        assert_eq!(report.last_sequence, Some(2));
        assert!(cold.get("C3").is_none());
        assert!(cold.get("E5").is_some());
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let cold = Arc::new(MemoryTier::cold());
        let archiver = archiver(cold.clone());

        let report = archiver.process_batch_at(&[], now()).await.unwrap();
        assert_eq!(report, BatchReport::default());
        assert_eq!(cold.upsert_calls(), 0);
    }

    #[tokio::test]
    async fn test_batch_idempotent() {
        let cold = Arc::new(MemoryTier::cold());
        let archiver = archiver(cold.clone());
        let events = vec![event(0, aged("A1")), event(1, aged("A2")), event(2, fresh("B1"))];

        archiver.process_batch_at(&events, now()).await.unwrap();
        let first = (cold.get("A1"), cold.get("A2"), cold.len());
        archiver.process_batch_at(&events, now()).await.unwrap();
        let second = (cold.get("A1"), cold.get("A2"), cold.len());

        assert_eq!(first, second);
        assert_eq!(cold.len(), 2);
    }

    #[tokio::test]
    async fn test_transient_failure_retried() {
        let cold = Arc::new(MemoryTier::cold());
        cold.fail_next(TierError::transient("cold", "throttled"));
        let archiver = archiver(cold.clone());

        let report = archiver
            .process_batch_at(&[event(0, aged("A1"))], now())
            .await
            .unwrap();

        assert_eq!(report.migrated, 1);
        assert_eq!(report.retries, 1);
    }

    #[tokio::test]
    async fn test_fatal_failure_aborts_batch() {
        let cold = Arc::new(MemoryTier::cold());
        cold.fail_id("A2", TierError::fatal("cold", "unreachable"));
        let archiver = archiver(cold.clone());

        let events = vec![event(0, aged("A1")), event(1, aged("A2")), event(2, aged("A3"))];
        let err = archiver.process_batch_at(&events, now()).await.unwrap_err();
        assert!(matches!(err, ArchiveError::Tier(TierError::Fatal { .. })));
        assert_eq!(cold.upsert_calls(), 2);
        assert!(cold.get("A1").is_some());
        assert!(cold.get("A3").is_none());

        // redelivery after the tier recovers
        cold.clear_failures();
        let report = archiver.process_batch_at(&events, now()).await.unwrap();
        assert_eq!(report.migrated, 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_abort_batch() {
        let cold = Arc::new(MemoryTier::cold());
        cold.fail_id("A1", TierError::transient("cold", "throttled"));
        let archiver = archiver(cold.clone());

        let err = archiver
            .process_batch_at(&[event(0, aged("A1"))], now())
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Tier(TierError::Transient { .. })));
        // first attempt plus three retries
        assert_eq!(cold.upsert_calls(), 4);
    }
}
