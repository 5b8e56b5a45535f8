//! Helios Index Sync
//!
//! This crate keeps a full-text search index consistent with the records of
//! a primary store and exposes a uniform query surface over it. One generic
//! engine serves every entity type; an entity type only contributes a
//! collection name and a document codec.
//!
//! # Features
//!
//! - **Eventually consistent indexing**: index mutations run detached from
//!   the primary-store write that triggered them
//! - **Per-record ordering**: mutations for the same record never overtake
//!   each other, so an older write cannot clobber a newer one
//! - **Bounded retries**: transient engine failures are retried with
//!   exponential backoff, then reported
//! - **Free-text and structured queries**: query-string syntax passes through
//!   to the engine verbatim; structured queries are engine-neutral
//!
//! Enable engines with feature flags in `Cargo.toml`:
//!
//! - `elasticsearch` - Elasticsearch index client
//! - `admin` - the `index-admin` operator binary
//!
//! # Architecture
//!
//! - [`codec`] - record/document conversion
//! - [`client`] - index clients ([`MemoryIndex`], `ElasticsearchIndex`)
//! - [`query`] - query model and translation
//! - [`sync`] - synchronizer, dispatcher and failure reporting
//! - [`facade`] - the per-entity-type search service
//! - [`entity`] - entity kinds and their registrations
//! - [`store`] - the primary store as seen by this crate
//! - [`reindex`] - bulk re-indexing jobs
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use futures::TryStreamExt;
//! use helios_index_sync::{
//!     EntityKind, EntityRecord, MemoryIndex, MemoryRecordStore, RecordSource, SearchServices,
//! };
//!
//! # tokio_test::block_on(async {
//! let store = Arc::new(MemoryRecordStore::<EntityRecord>::new());
//! let services = SearchServices::builder(Arc::new(MemoryIndex::new()))
//!     .source(EntityKind::Team, store.clone() as Arc<dyn RecordSource<EntityRecord>>)
//!     .build();
//! let teams = services.facade(EntityKind::Team).unwrap();
//!
//! // Write to the primary store, then trigger indexing
//! let record = EntityRecord::new("t1").with_field("name", "night shift");
//! store.upsert(record.clone());
//! teams.index(&record).unwrap().wait().await;
//!
//! let found: Vec<EntityRecord> = teams
//!     .search("name:night")
//!     .await
//!     .unwrap()
//!     .try_collect()
//!     .await
//!     .unwrap();
//! assert_eq!(found, vec![record]);
//! # });
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod client;
pub mod codec;
pub mod config;
pub mod entity;
pub mod error;
pub mod facade;
pub mod query;
pub mod reindex;
pub mod store;
pub mod sync;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{CodecError, IndexError, StoreError, SyncError, SyncErrorKind, SyncResult};
pub use types::{Document, Record};

pub use client::{DocumentStream, IndexClient, MemoryIndex};
pub use codec::{DocumentCodec, JsonCodec};
pub use config::{IndexSyncConfig, RetryConfig, SyncConfig};
pub use entity::{EntityKind, EntityRecord, Registration, SearchServices};
pub use facade::{RecordStream, SearchFacade};
pub use query::{NativeQuery, QueryTranslator, SearchQuery, StructuredQuery};
pub use store::{MemoryRecordStore, RecordScan, RecordSource};
pub use sync::{
    SyncDispatcher, SyncFailure, SyncOperation, SyncOutcome, SyncReporter, SyncTicket,
    Synchronizer, TracingReporter,
};

#[cfg(feature = "elasticsearch")]
pub use client::{ElasticsearchConfig, ElasticsearchIndex};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
