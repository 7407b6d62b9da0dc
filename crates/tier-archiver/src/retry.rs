//! Per-record retry of cold-tier writes.

use std::time::Duration;

use backoff::{backoff::Backoff, ExponentialBackoff};
use tracing::{debug, error, warn};

use tier_types::{Record, RecordWriter, RetrySettings, TierError};

/// Retry policy for transient cold-tier failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Give up once this much time has passed since the first attempt
    pub max_elapsed: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_interval: Duration::from_millis(settings.initial_interval_ms),
            max_interval: Duration::from_millis(settings.max_interval_ms),
            max_elapsed: Duration::from_millis(settings.max_elapsed_ms),
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_interval,
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        }
    }
}

/// Upsert a record, retrying transient failures with exponential backoff.
///
/// Returns the number of retries it took. Fatal and malformed-record errors
/// are returned immediately; transient errors are returned once retries or
/// elapsed time are exhausted.
pub async fn upsert_with_retry(
    writer: &dyn RecordWriter,
    record: &Record,
    config: &RetryConfig,
) -> Result<u32, TierError> {
    let mut backoff = config.backoff();
    let mut retries = 0;

    loop {
        match writer.upsert(record).await {
            Ok(()) => {
                if retries > 0 {
                    debug!(id = %record.id, retries = retries, "Upsert succeeded after retry");
                }
                return Ok(retries);
            }
            Err(e) if !e.is_transient() => {
                error!(tier = %writer.name(), id = %record.id, error = %e, "Upsert failed");
                return Err(e);
            }
            Err(e) => {
                if retries >= config.max_retries {
                    error!(id = %record.id, error = %e, "Max retries exceeded");
                    return Err(e);
                }

                match backoff.next_backoff() {
                    Some(duration) => {
                        warn!(
                            tier = %writer.name(),
                            id = %record.id,
                            error = %e,
                            retry_in_ms = duration.as_millis(),
                            "Upsert failed, retrying"
                        );
                        tokio::time::sleep(duration).await;
                        retries += 1;
                    }
                    None => {
                        error!(id = %record.id, error = %e, "Backoff exhausted");
                        return Err(e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryTier;

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            max_elapsed: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_config_from_settings() {
        let config = RetryConfig::from(&RetrySettings::default());
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.initial_interval, Duration::from_millis(100));
        assert_eq!(config.max_elapsed, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_succeeds_first_try() {
        let cold = MemoryTier::cold();
        let record = Record::new("A1");

        let retries = upsert_with_retry(&cold, &record, &fast_retry(3)).await.unwrap();
        assert_eq!(retries, 0);
        assert_eq!(cold.get("A1"), Some(record));
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let cold = MemoryTier::cold();
        cold.fail_next(TierError::transient("cold", "throttled"));
        cold.fail_next(TierError::transient("cold", "throttled"));

        let retries = upsert_with_retry(&cold, &Record::new("A1"), &fast_retry(3))
            .await
            .unwrap();
        assert_eq!(retries, 2);
        assert_eq!(cold.upsert_calls(), 3);
        assert!(cold.get("A1").is_some());
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let cold = MemoryTier::cold();
        for _ in 0..5 {
            cold.fail_next(TierError::transient("cold", "throttled"));
        }

        let err = upsert_with_retry(&cold, &Record::new("A1"), &fast_retry(2))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(cold.upsert_calls(), 3);
        assert!(cold.get("A1").is_none());
    }

    #[tokio::test]
    async fn test_fatal_not_retried() {
        let cold = MemoryTier::cold();
        cold.fail_next(TierError::fatal("cold", "unreachable"));

        let err = upsert_with_retry(&cold, &Record::new("A1"), &fast_retry(5))
            .await
            .unwrap_err();
        assert!(matches!(err, TierError::Fatal { .. }));
        assert_eq!(cold.upsert_calls(), 1);
    }
}
