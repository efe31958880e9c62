//! In-memory sink

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use super::{AppendOutcome, Sink, SinkError, SinkSnapshot};
use crate::CanonicalRecord;

#[derive(Debug, Default)]
struct Inner {
    records: Vec<Arc<CanonicalRecord>>,
    keys: HashSet<String>,
}

/// Sink holding every record in memory
///
/// Appends and snapshots are serialized by one lock, so a snapshot never sees a
/// partially applied append.
#[derive(Debug, Default)]
pub struct MemorySink {
    inner: RwLock<Inner>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.records.len()).unwrap_or(0)
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, record: CanonicalRecord) -> Result<AppendOutcome, SinkError> {
        let mut inner = self.inner.write().map_err(|_| SinkError::Poisoned)?;
        if inner.keys.contains(record.dedup_key()) {
            return Ok(AppendOutcome::DuplicateRejected);
        }
        inner.keys.insert(record.dedup_key().to_string());
        inner.records.push(Arc::new(record));
        Ok(AppendOutcome::Appended)
    }

    fn insert_all(&self, records: Vec<CanonicalRecord>) -> Result<Vec<AppendOutcome>, SinkError> {
        let mut inner = self.inner.write().map_err(|_| SinkError::Poisoned)?;
        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            if inner.keys.insert(record.dedup_key().to_string()) {
                inner.records.push(Arc::new(record));
                outcomes.push(AppendOutcome::Appended);
            } else {
                outcomes.push(AppendOutcome::DuplicateRejected);
            }
        }
        Ok(outcomes)
    }

    fn view(&self) -> Result<SinkSnapshot, SinkError> {
        let inner = self.inner.read().map_err(|_| SinkError::Poisoned)?;
        Ok(SinkSnapshot::new(inner.records.clone()))
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn append(&self, record: CanonicalRecord) -> Result<AppendOutcome, SinkError> {
        self.insert(record)
    }

    async fn append_batch(&self, records: Vec<CanonicalRecord>) -> Result<Vec<AppendOutcome>, SinkError> {
        self.insert_all(records)
    }

    async fn snapshot(&self) -> Result<SinkSnapshot, SinkError> {
        self.view()
    }
}
