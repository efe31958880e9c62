//! Append-only record storage with deduplication
//!
//! A sink accepts canonical records and rejects any record whose dedup key it has
//! already stored, which makes re-ingesting overlapping pages idempotent.
//! Snapshots are consistent, finite and restartable.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::template::schema;
use crate::CanonicalRecord;

pub mod memory;

pub use memory::MemorySink;

/// Result of appending one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Stored
    Appended,
    /// A record with the same dedup key is already stored
    DuplicateRejected,
}

/// Sink errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// Internal lock poisoned by a panicking writer
    #[error("sink lock poisoned")]
    Poisoned,

    /// Storage backend unavailable
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// Record storage shared by every collection loop
#[async_trait]
pub trait Sink: Send + Sync {
    /// Append a record unless its dedup key is already present
    async fn append(&self, record: CanonicalRecord) -> Result<AppendOutcome, SinkError>;

    /// Append a page of records as one unit
    ///
    /// Either every record is applied (appended or rejected as a duplicate,
    /// including duplicates within the batch) or, on error, none is. Outcomes are
    /// returned in input order.
    async fn append_batch(&self, records: Vec<CanonicalRecord>) -> Result<Vec<AppendOutcome>, SinkError>;

    /// Consistent view of every stored record in append order
    async fn snapshot(&self) -> Result<SinkSnapshot, SinkError>;
}

/// Immutable view of a sink's records
#[derive(Debug, Clone, Default)]
pub struct SinkSnapshot {
    records: Arc<[Arc<CanonicalRecord>]>,
}

impl SinkSnapshot {
    /// Wrap a list of records
    pub fn new(records: Vec<Arc<CanonicalRecord>>) -> Self {
        Self {
            records: records.into(),
        }
    }

    /// Records in append order; every call starts from the beginning
    pub fn iter(&self) -> impl Iterator<Item = &CanonicalRecord> + '_ {
        self.records.iter().map(|r| r.as_ref())
    }

    /// Shared handle to a record by position
    pub fn get(&self, index: usize) -> Option<&Arc<CanonicalRecord>> {
        self.records.get(index)
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the snapshot is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Field names observed in the snapshot
    ///
    /// Metadata fields plus every data field present on at least one record.
    pub fn observed_fields(&self) -> BTreeSet<String> {
        let mut fields: BTreeSet<String> = schema::metadata_fields().map(str::to_string).collect();
        for record in self.records.iter() {
            fields.extend(record.fields().keys().cloned());
        }
        fields
    }
}

impl From<Vec<CanonicalRecord>> for SinkSnapshot {
    fn from(records: Vec<CanonicalRecord>) -> Self {
        Self::new(records.into_iter().map(Arc::new).collect())
    }
}
