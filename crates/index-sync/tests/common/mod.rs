//! Shared fixtures and test doubles for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use helios_index_sync::config::{RetryConfig, SyncConfig};
use helios_index_sync::error::{IndexError, IndexResult};
use helios_index_sync::{
    Document, DocumentStream, EntityKind, EntityRecord, IndexClient, MemoryIndex,
    MemoryRecordStore, NativeQuery, RecordSource, SearchServices, SyncFailure, SyncReporter,
};

/// A team record with a name.
pub fn team(id: &str, name: &str) -> EntityRecord {
    EntityRecord::new(id).with_field("name", name)
}

/// A medication record with a name and dose.
pub fn medication(id: &str, name: &str, dose_mg: i64) -> EntityRecord {
    EntityRecord::new(id)
        .with_field("name", name)
        .with_field("dose_mg", dose_mg)
}

/// Retries with short delays so paused-clock tests advance quickly.
pub fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(100),
        backoff_multiplier: 2.0,
    }
}

/// Collects every reported failure.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    failures: Mutex<Vec<SyncFailure>>,
}

impl RecordingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failures(&self) -> Vec<SyncFailure> {
        self.failures.lock().clone()
    }
}

impl SyncReporter for RecordingReporter {
    fn report(&self, failure: &SyncFailure) {
        self.failures.lock().push(failure.clone());
    }
}

/// How a [`FaultyIndex`] misbehaves on writes.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// The first `n` writes fail as unavailable.
    UnavailableFor(u32),
    /// Every write fails as unavailable.
    AlwaysUnavailable,
    /// Every write is rejected.
    Reject,
}

/// Wraps a [`MemoryIndex`] and fails writes according to a [`Fault`].
#[derive(Debug)]
pub struct FaultyIndex {
    inner: Arc<MemoryIndex>,
    fault: Fault,
    writes: AtomicU32,
}

impl FaultyIndex {
    pub fn new(inner: Arc<MemoryIndex>, fault: Fault) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fault,
            writes: AtomicU32::new(0),
        })
    }

    /// Number of write attempts seen, failed ones included.
    pub fn writes(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    fn check(&self, collection: &str, id: &str) -> IndexResult<()> {
        let attempt = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        match self.fault {
            Fault::UnavailableFor(n) if attempt <= n => Err(IndexError::Unavailable {
                collection: collection.to_string(),
                message: format!("connection refused (attempt {})", attempt),
            }),
            Fault::UnavailableFor(_) => Ok(()),
            Fault::AlwaysUnavailable => Err(IndexError::Unavailable {
                collection: collection.to_string(),
                message: "connection refused".to_string(),
            }),
            Fault::Reject => Err(IndexError::Rejected {
                collection: collection.to_string(),
                id: Some(id.to_string()),
                message: "mapper_parsing_exception".to_string(),
            }),
        }
    }
}

#[async_trait]
impl IndexClient for FaultyIndex {
    fn engine_name(&self) -> &'static str {
        "faulty"
    }

    async fn put(&self, collection: &str, document: Document) -> IndexResult<()> {
        self.check(collection, document.id())?;
        self.inner.put(collection, document).await
    }

    async fn delete(&self, collection: &str, id: &str) -> IndexResult<()> {
        self.check(collection, id)?;
        self.inner.delete(collection, id).await
    }

    async fn query(&self, collection: &str, query: NativeQuery) -> IndexResult<DocumentStream> {
        self.inner.query(collection, query).await
    }
}

/// Services for every entity kind over in-memory stores.
pub struct Harness {
    pub index: Arc<MemoryIndex>,
    pub stores: Vec<(EntityKind, Arc<MemoryRecordStore<EntityRecord>>)>,
    pub services: SearchServices,
    pub reporter: Arc<RecordingReporter>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_client(SyncConfig::default(), |index| index as Arc<dyn IndexClient>)
    }

    /// Builds the harness with `wrap` placed between the facades and the
    /// in-memory index.
    pub fn with_client(
        config: SyncConfig,
        wrap: impl FnOnce(Arc<MemoryIndex>) -> Arc<dyn IndexClient>,
    ) -> Self {
        let index = Arc::new(MemoryIndex::new());
        let reporter = RecordingReporter::new();
        let stores: Vec<_> = EntityKind::ALL
            .into_iter()
            .map(|kind| (kind, Arc::new(MemoryRecordStore::<EntityRecord>::new())))
            .collect();

        let by_kind = stores.clone();
        let services = SearchServices::builder(wrap(index.clone()))
            .config(config)
            .reporter(reporter.clone())
            .sources(move |kind| -> Arc<dyn RecordSource<EntityRecord>> {
                let (_, store) = by_kind
                    .iter()
                    .find(|(k, _)| *k == kind)
                    .expect("every kind has a store");
                store.clone()
            })
            .build();

        Self {
            index,
            stores,
            services,
            reporter,
        }
    }

    pub fn store(&self, kind: EntityKind) -> &Arc<MemoryRecordStore<EntityRecord>> {
        &self
            .stores
            .iter()
            .find(|(k, _)| *k == kind)
            .expect("every kind has a store")
            .1
    }
}
