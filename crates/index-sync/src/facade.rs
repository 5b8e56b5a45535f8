//! The per-entity-type search service.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;

use crate::client::IndexClient;
use crate::codec::DocumentCodec;
use crate::error::{SyncError, SyncResult};
use crate::query::{QueryTranslator, SearchQuery};
use crate::sync::{SyncDispatcher, SyncOperation, SyncTicket, Synchronizer};
use crate::types::Record;

/// A lazy sequence of search results, in engine order.
pub type RecordStream<R> = BoxStream<'static, SyncResult<R>>;

/// Search and index maintenance for one entity type.
///
/// `index` and `remove_from_index` only schedule work: they return as soon
/// as the dispatcher accepts the task. The returned [`SyncTicket`] may be
/// dropped, or awaited when the caller needs to know the mutation landed.
///
/// # Example
///
/// ```ignore
/// let ticket = facade.index(&record)?;
/// ticket.wait().await;
///
/// let mut results = facade.search("name:bar").await?;
/// while let Some(record) = results.next().await {
///     println!("{}", record?.id());
/// }
/// ```
pub struct SearchFacade<C: DocumentCodec> {
    synchronizer: Arc<Synchronizer<C>>,
    codec: Arc<C>,
    client: Arc<dyn IndexClient>,
    dispatcher: SyncDispatcher,
}

impl<C: DocumentCodec> SearchFacade<C> {
    /// Creates a facade around a synchronizer.
    ///
    /// The codec and client must be the ones the synchronizer writes with.
    pub fn new(
        synchronizer: Arc<Synchronizer<C>>,
        codec: Arc<C>,
        client: Arc<dyn IndexClient>,
        dispatcher: SyncDispatcher,
    ) -> Self {
        Self {
            synchronizer,
            codec,
            client,
            dispatcher,
        }
    }

    /// Returns the collection name.
    pub fn collection(&self) -> &str {
        self.synchronizer.collection()
    }

    /// Returns the synchronizer backing this facade.
    pub fn synchronizer(&self) -> &Arc<Synchronizer<C>> {
        &self.synchronizer
    }

    /// Runs a free-text or structured query and streams the matching records.
    ///
    /// # Errors
    ///
    /// Fails with `SyncError::Index` when the engine cannot run the query.
    /// A query that matches nothing yields an empty stream instead. Documents
    /// that cannot be decoded surface as `Err` items in the stream.
    pub async fn search(
        &self,
        query: impl Into<SearchQuery>,
    ) -> SyncResult<RecordStream<C::Record>> {
        let native = QueryTranslator::translate(query.into());
        let documents = self
            .client
            .query(self.collection(), native)
            .await
            .inspect_err(|e| {
                tracing::warn!(collection = %self.collection(), error = %e, "Search failed");
            })?;

        let codec = self.codec.clone();
        Ok(documents
            .map(move |document| {
                let document = document?;
                codec.decode(document).map_err(SyncError::from)
            })
            .boxed())
    }

    /// Schedules the record's document to be refreshed from the primary
    /// store.
    ///
    /// Only the identifier of `record` is used; the synchronizer re-reads
    /// the committed record before writing.
    ///
    /// # Errors
    ///
    /// Fails with the dispatcher's refusals: `QueueFull`, `ShuttingDown`,
    /// or `NoRuntime` when no Tokio runtime is reachable.
    pub fn index(&self, record: &C::Record) -> SyncResult<SyncTicket> {
        self.schedule(SyncOperation::Upsert, record.id())
    }

    /// Schedules the document for `id` to be refreshed from the primary store.
    pub fn index_id(&self, id: &str) -> SyncResult<SyncTicket> {
        self.schedule(SyncOperation::Upsert, id)
    }

    /// Schedules the document for `id` to be removed from the index.
    pub fn remove_from_index(&self, id: &str) -> SyncResult<SyncTicket> {
        self.schedule(SyncOperation::Delete, id)
    }

    fn schedule(&self, operation: SyncOperation, id: &str) -> SyncResult<SyncTicket> {
        self.dispatcher
            .submit(self.synchronizer.clone(), operation, id)
            .inspect_err(|e| {
                tracing::warn!(
                    collection = %self.collection(),
                    id = %id,
                    %operation,
                    error = %e,
                    "Sync task not accepted"
                );
            })
    }
}

impl<C: DocumentCodec> std::fmt::Debug for SearchFacade<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchFacade")
            .field("collection", &self.collection())
            .field("engine", &self.client.engine_name())
            .finish_non_exhaustive()
    }
}
