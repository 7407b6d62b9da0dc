//! Tier contract implementations for [`TierStore`].
//!
//! RocksDB calls are synchronous and short; they run inline on the
//! calling task.

use async_trait::async_trait;

use tier_types::{
    ChangeEvent, ChangeFeed, Lookup, Record, RecordReader, RecordWriter, Tier, TierError, TierKind,
};

use crate::db::TierStore;

impl Tier for TierStore {
    fn kind(&self) -> TierKind {
        TierStore::kind(self)
    }

    fn name(&self) -> &str {
        TierStore::name(self)
    }
}

#[async_trait]
impl RecordReader for TierStore {
    async fn read(&self, id: &str) -> Result<Lookup, TierError> {
        self.get_record(id)
            .map(Lookup::from)
            .map_err(|e| e.into_tier_error(TierStore::name(self)))
    }
}

#[async_trait]
impl RecordWriter for TierStore {
    async fn upsert(&self, record: &Record) -> Result<(), TierError> {
        self.put_record(record)
            .map(|_| ())
            .map_err(|e| e.into_tier_error(TierStore::name(self)))
    }
}

#[async_trait]
impl ChangeFeed for TierStore {
    fn partitions(&self) -> u32 {
        TierStore::partitions(self)
    }

    async fn read_changes(
        &self,
        partition: u32,
        after: Option<u64>,
        limit: usize,
    ) -> Result<Vec<ChangeEvent>, TierError> {
        self.get_changes(partition, after, limit)
            .map_err(|e| e.into_tier_error(TierStore::name(self)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TierOptions;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_store_through_traits() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(
            TierStore::open(temp_dir.path(), TierOptions::hot("billing-hot", 2)).unwrap(),
        );

        let writer: Arc<dyn RecordWriter> = store.clone();
        let reader: Arc<dyn RecordReader> = store.clone();
        let feed: Arc<dyn ChangeFeed> = store.clone();

        assert_eq!(writer.name(), "billing-hot");
        assert_eq!(reader.kind(), TierKind::Hot);

        let record = Record::new("A1").with_field("timestamp", "2024-01-01");
        writer.upsert(&record).await.unwrap();

        assert_eq!(reader.read("A1").await.unwrap(), Lookup::Found(record));
        assert_eq!(reader.read("B2").await.unwrap(), Lookup::NotFound);

        let mut total = 0;
        for partition in 0..feed.partitions() {
            total += feed.read_changes(partition, None, 10).await.unwrap().len();
        }
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn test_errors_carry_tier_name() {
        let temp_dir = TempDir::new().unwrap();
        let store = TierStore::open(temp_dir.path(), TierOptions::hot("hot-eu", 1)).unwrap();

        let err = store.read_changes(5, None, 10).await.unwrap_err();
        assert!(matches!(err, TierError::Fatal { ref tier, .. } if tier == "hot-eu"));

        let err = store.upsert(&Record::new(" ")).await.unwrap_err();
        assert!(matches!(err, TierError::MalformedRecord { .. }));
    }
}
