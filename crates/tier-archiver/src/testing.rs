//! In-memory tier used by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use tier_types::{Record, RecordWriter, Tier, TierError, TierKind};

/// Map-backed tier with injectable write failures.
pub struct MemoryTier {
    kind: TierKind,
    records: Mutex<HashMap<String, Record>>,
    failures: Mutex<VecDeque<TierError>>,
    failing_ids: Mutex<HashMap<String, TierError>>,
    upserts: AtomicUsize,
}

impl MemoryTier {
    pub fn cold() -> Self {
        Self {
            kind: TierKind::Cold,
            records: Mutex::new(HashMap::new()),
            failures: Mutex::new(VecDeque::new()),
            failing_ids: Mutex::new(HashMap::new()),
            upserts: AtomicUsize::new(0),
        }
    }

    /// Queue an error for the next upsert call.
    pub fn fail_next(&self, err: TierError) {
        self.failures.lock().unwrap().push_back(err);
    }

    /// Fail every upsert of `id` until cleared.
    pub fn fail_id(&self, id: &str, err: TierError) {
        self.failing_ids.lock().unwrap().insert(id.to_string(), err);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
        self.failing_ids.lock().unwrap().clear();
    }

    pub fn get(&self, id: &str) -> Option<Record> {
        self.records.lock().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn upsert_calls(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }
}

impl Tier for MemoryTier {
    fn kind(&self) -> TierKind {
        self.kind
    }

    fn name(&self) -> &str {
        "memory-cold"
    }
}

#[async_trait]
impl RecordWriter for MemoryTier {
    async fn upsert(&self, record: &Record) -> Result<(), TierError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        if let Some(err) = self.failing_ids.lock().unwrap().get(&record.id) {
            return Err(err.clone());
        }
        self.records
            .lock()
            .unwrap()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }
}
