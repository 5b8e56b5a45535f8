//! The primary store as seen by the synchronization layer.
//!
//! The store is the source of truth and lives outside this crate. The
//! synchronizer only needs to look records up by identifier
//! ([`RecordSource`]); bulk re-indexing additionally needs to enumerate
//! identifiers ([`RecordScan`]).

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::StoreResult;
use crate::types::Record;

/// Point lookups against the primary store.
#[async_trait]
pub trait RecordSource<R: Record>: Send + Sync {
    /// Reads the current record for `id`, or `None` if it does not exist.
    async fn get(&self, id: &str) -> StoreResult<Option<R>>;
}

/// Identifier enumeration, used by bulk re-indexing.
#[async_trait]
pub trait RecordScan: Send + Sync {
    /// Returns up to `limit` identifiers in ascending order, starting after
    /// `after` (exclusive). An empty result means the scan is complete.
    async fn list_ids(&self, after: Option<&str>, limit: usize) -> StoreResult<Vec<String>>;
}

#[async_trait]
impl<R: Record, T: RecordSource<R> + ?Sized> RecordSource<R> for Arc<T> {
    async fn get(&self, id: &str) -> StoreResult<Option<R>> {
        (**self).get(id).await
    }
}

#[async_trait]
impl<T: RecordScan + ?Sized> RecordScan for Arc<T> {
    async fn list_ids(&self, after: Option<&str>, limit: usize) -> StoreResult<Vec<String>> {
        (**self).list_ids(after, limit).await
    }
}

/// An in-memory primary store.
///
/// Useful for tests and for embedding the synchronization layer in
/// applications that keep their records in memory.
#[derive(Debug)]
pub struct MemoryRecordStore<R> {
    records: RwLock<BTreeMap<String, R>>,
}

impl<R> Default for MemoryRecordStore<R> {
    fn default() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<R: Record + Clone> MemoryRecordStore<R> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a record, returning the previous version.
    pub fn upsert(&self, record: R) -> Option<R> {
        self.records.write().insert(record.id().to_string(), record)
    }

    /// Removes a record, returning it if it existed.
    pub fn remove(&self, id: &str) -> Option<R> {
        self.records.write().remove(id)
    }

    /// Returns a copy of the record with the given identifier.
    pub fn record(&self, id: &str) -> Option<R> {
        self.records.read().get(id).cloned()
    }

    /// Returns the number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl<R: Record + Clone> RecordSource<R> for MemoryRecordStore<R> {
    async fn get(&self, id: &str) -> StoreResult<Option<R>> {
        Ok(self.record(id))
    }
}

#[async_trait]
impl<R: Record + Clone> RecordScan for MemoryRecordStore<R> {
    async fn list_ids(&self, after: Option<&str>, limit: usize) -> StoreResult<Vec<String>> {
        let records = self.records.read();
        let lower = match after {
            Some(after) => Bound::Excluded(after),
            None => Bound::Unbounded,
        };
        Ok(records
            .range::<str, _>((lower, Bound::Unbounded))
            .take(limit)
            .map(|(id, _)| id.clone())
            .collect())
    }
}
