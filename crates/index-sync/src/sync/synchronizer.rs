use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, trace, warn};

use crate::client::IndexClient;
use crate::codec::DocumentCodec;
use crate::config::RetryConfig;
use crate::error::{CodecError, SyncError, SyncResult};
use crate::store::RecordSource;
use crate::types::Record;

use super::{
    SyncFailure, SyncOperation, SyncOutcome, SyncReporter, SyncTarget, TracingReporter,
};

/// Keeps one collection of the index in line with the primary store.
///
/// Upserts always re-read the authoritative record instead of trusting a
/// payload from the caller, so a retried or late upsert writes the latest
/// committed state.
pub struct Synchronizer<C: DocumentCodec> {
    collection: String,
    codec: Arc<C>,
    source: Arc<dyn RecordSource<C::Record>>,
    client: Arc<dyn IndexClient>,
    retry: RetryConfig,
    reporter: Arc<dyn SyncReporter>,
}

impl<C: DocumentCodec> Synchronizer<C> {
    /// Creates a synchronizer with the default retry policy, reporting
    /// failures through [`TracingReporter`].
    pub fn new(
        collection: impl Into<String>,
        codec: Arc<C>,
        source: Arc<dyn RecordSource<C::Record>>,
        client: Arc<dyn IndexClient>,
    ) -> Self {
        Self {
            collection: collection.into(),
            codec,
            source,
            client,
            retry: RetryConfig::default(),
            reporter: Arc::new(TracingReporter),
        }
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the failure reporter.
    pub fn with_reporter(mut self, reporter: Arc<dyn SyncReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Returns the collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Re-reads the record for `id` and writes its document to the index.
    ///
    /// A record that no longer exists is skipped without touching the index.
    pub async fn on_upsert(&self, id: &str) -> SyncOutcome {
        self.run(SyncOperation::Upsert, id).await
    }

    /// Removes the document for `id` from the index.
    pub async fn on_delete(&self, id: &str) -> SyncOutcome {
        self.run(SyncOperation::Delete, id).await
    }

    async fn run(&self, operation: SyncOperation, id: &str) -> SyncOutcome {
        let mut delay = self.retry.initial_delay;
        let mut attempts = 0;

        loop {
            attempts += 1;

            let result = match operation {
                SyncOperation::Upsert => self.upsert_once(id).await,
                SyncOperation::Delete => self.delete_once(id).await,
            };

            match result {
                Ok(outcome) => {
                    if attempts > 1 {
                        debug!(
                            collection = %self.collection,
                            id = %id,
                            attempts = attempts,
                            "Sync succeeded after retries"
                        );
                    }
                    return outcome;
                }
                Err(SyncError::RecordNotFound { .. }) => {
                    debug!(
                        collection = %self.collection,
                        id = %id,
                        "Record no longer exists, skipping upsert"
                    );
                    return SyncOutcome::Skipped;
                }
                Err(e) => {
                    if !e.is_transient() || attempts > self.retry.max_retries {
                        let failure = SyncFailure {
                            collection: self.collection.clone(),
                            id: id.to_string(),
                            operation,
                            kind: e.kind(),
                            message: e.to_string(),
                            attempts,
                        };
                        self.reporter.report(&failure);
                        return SyncOutcome::Failed { kind: failure.kind };
                    }

                    warn!(
                        collection = %self.collection,
                        id = %id,
                        operation = %operation,
                        attempt = attempts,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Sync attempt failed, retrying"
                    );

                    sleep(delay).await;
                    delay = self.retry.next_delay(delay);
                }
            }
        }
    }

    async fn upsert_once(&self, id: &str) -> SyncResult<SyncOutcome> {
        let record = self
            .source
            .get(id)
            .await?
            .ok_or_else(|| SyncError::RecordNotFound {
                collection: self.collection.clone(),
                id: id.to_string(),
            })?;

        let document = self.codec.encode(&record);
        if document.id() != record.id() || record.id() != id {
            return Err(CodecError::InvalidDocument {
                id: id.to_string(),
                message: format!("encoded identifier '{}' does not match", document.id()),
            }
            .into());
        }

        self.client.put(&self.collection, document).await?;
        trace!(collection = %self.collection, id = %id, "Indexed record");
        Ok(SyncOutcome::Indexed)
    }

    async fn delete_once(&self, id: &str) -> SyncResult<SyncOutcome> {
        self.client.delete(&self.collection, id).await?;
        trace!(collection = %self.collection, id = %id, "Removed record from index");
        Ok(SyncOutcome::Removed)
    }
}

#[async_trait]
impl<C: DocumentCodec> SyncTarget for Synchronizer<C> {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn apply(&self, operation: SyncOperation, id: &str) -> SyncOutcome {
        self.run(operation, id).await
    }
}

impl<C: DocumentCodec> std::fmt::Debug for Synchronizer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("collection", &self.collection)
            .field("engine", &self.client.engine_name())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
