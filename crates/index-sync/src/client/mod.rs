//! Index clients.
//!
//! An [`IndexClient`] is a thin adapter over a search engine's document and
//! query APIs. One client instance is shared by every entity type's facade,
//! so implementations must be safe for concurrent use.
//!
//! # Implementations
//!
//! | Client | Feature | Use |
//! |--------|---------|-----|
//! | [`MemoryIndex`] | always | tests, embedded use, local development |
//! | `ElasticsearchIndex` | `elasticsearch` | production search engine |

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::IndexResult;
use crate::query::NativeQuery;
use crate::types::Document;

pub mod memory;

#[cfg(feature = "elasticsearch")]
pub mod elasticsearch;

pub use memory::MemoryIndex;

#[cfg(feature = "elasticsearch")]
pub use self::elasticsearch::{ElasticsearchAuth, ElasticsearchConfig, ElasticsearchIndex};

/// A finite, non-restartable sequence of matching documents.
///
/// Dropping the stream before it is exhausted stops fetching further pages.
/// To scan again, issue a fresh query.
pub type DocumentStream = BoxStream<'static, IndexResult<Document>>;

/// Document and query operations against a search engine.
#[async_trait]
pub trait IndexClient: Send + Sync {
    /// Returns a human-readable name for the underlying engine.
    fn engine_name(&self) -> &'static str;

    /// Inserts or fully replaces the document with the same identifier.
    ///
    /// # Errors
    ///
    /// * `IndexError::Unavailable` - transport or engine failure (transient)
    /// * `IndexError::Rejected` - the engine refused the document (permanent)
    async fn put(&self, collection: &str, document: Document) -> IndexResult<()>;

    /// Removes the document with the given identifier.
    ///
    /// Deleting an identifier that is not indexed succeeds.
    async fn delete(&self, collection: &str, id: &str) -> IndexResult<()>;

    /// Executes a query and streams the matching documents in engine order.
    ///
    /// # Errors
    ///
    /// * `IndexError::QueryFailed` - the engine could not execute the query
    /// * `IndexError::Unavailable` - transport failure
    async fn query(&self, collection: &str, query: NativeQuery) -> IndexResult<DocumentStream>;

    /// Checks that the engine is reachable and healthy.
    async fn health_check(&self) -> IndexResult<()> {
        Ok(())
    }
}
