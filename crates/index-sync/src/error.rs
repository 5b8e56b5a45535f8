//! Error types for the index synchronization layer.
//!
//! Errors are split by the collaborator they originate from: the search
//! engine ([`IndexError`]), the primary record store ([`StoreError`]) and the
//! document codec ([`CodecError`]). [`SyncError`] wraps all of them together
//! with the dispatcher's own failure modes.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use serde::Serialize;
use thiserror::Error;

/// The primary error type for synchronization and search operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Search engine errors
    #[error(transparent)]
    Index(#[from] IndexError),

    /// Primary store errors
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Document conversion errors
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The source record vanished before it could be indexed.
    #[error("record not found: {collection}/{id}")]
    RecordNotFound { collection: String, id: String },

    /// The dispatcher refused the task because its queue is full.
    #[error("sync queue full: {pending} tasks pending (capacity {capacity})")]
    QueueFull { pending: usize, capacity: usize },

    /// The dispatcher is shutting down and no longer accepts tasks.
    #[error("sync dispatcher is shutting down")]
    ShuttingDown,

    /// No Tokio runtime is available to run the task on.
    #[error("no async runtime available to dispatch sync tasks")]
    NoRuntime,
}

impl SyncError {
    /// Returns true if retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Index(e) => e.is_transient(),
            SyncError::Store(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Returns the kind used when reporting this error to observability.
    pub fn kind(&self) -> SyncErrorKind {
        match self {
            SyncError::Index(IndexError::Unavailable { .. }) => SyncErrorKind::IndexUnavailable,
            SyncError::Index(IndexError::Rejected { .. }) => SyncErrorKind::IndexRejected,
            SyncError::Index(IndexError::QueryFailed { .. }) => SyncErrorKind::QueryFailed,
            SyncError::Index(IndexError::Serialization { .. }) => SyncErrorKind::IndexRejected,
            SyncError::Store(_) => SyncErrorKind::StoreUnavailable,
            SyncError::Codec(_) => SyncErrorKind::Codec,
            SyncError::RecordNotFound { .. } => SyncErrorKind::RecordNotFound,
            SyncError::QueueFull { .. } | SyncError::ShuttingDown | SyncError::NoRuntime => {
                SyncErrorKind::Dispatch
            }
        }
    }
}

/// Coarse classification of a failure, as seen by the observability sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncErrorKind {
    RecordNotFound,
    IndexUnavailable,
    IndexRejected,
    QueryFailed,
    StoreUnavailable,
    Codec,
    Dispatch,
}

impl SyncErrorKind {
    /// Returns the kind as a static string, suitable for log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncErrorKind::RecordNotFound => "record_not_found",
            SyncErrorKind::IndexUnavailable => "index_unavailable",
            SyncErrorKind::IndexRejected => "index_rejected",
            SyncErrorKind::QueryFailed => "query_failed",
            SyncErrorKind::StoreUnavailable => "store_unavailable",
            SyncErrorKind::Codec => "codec",
            SyncErrorKind::Dispatch => "dispatch",
        }
    }
}

impl std::fmt::Display for SyncErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors originating from the search engine.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Transport or engine failure. Retrying may succeed.
    #[error("index unavailable for {collection}: {message}")]
    Unavailable { collection: String, message: String },

    /// The engine refused the document. Retrying will not help.
    #[error("document rejected by {collection}: {message}")]
    Rejected {
        collection: String,
        id: Option<String>,
        message: String,
    },

    /// Query execution failed.
    #[error("query failed on {collection}: {message}")]
    QueryFailed { collection: String, message: String },

    /// A response or document could not be (de)serialized.
    #[error("serialization error: {message}")]
    Serialization { message: String },
}

impl IndexError {
    /// Returns true for failures worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, IndexError::Unavailable { .. })
    }

    pub(crate) fn unavailable(collection: &str, message: impl Into<String>) -> Self {
        IndexError::Unavailable {
            collection: collection.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn query_failed(collection: &str, message: impl Into<String>) -> Self {
        IndexError::QueryFailed {
            collection: collection.to_string(),
            message: message.into(),
        }
    }
}

/// Errors originating from the primary record store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store could not be reached. Retrying may succeed.
    #[error("primary store unavailable: {message}")]
    Unavailable { message: String },

    /// Any other store failure.
    #[error("primary store error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl StoreError {
    /// Returns true for failures worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. })
    }
}

/// Errors raised while converting documents back into records.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The document carries no identifier.
    #[error("document has no identifier")]
    MissingIdentifier,

    /// The document's fields do not fit the record type.
    #[error("cannot decode document {id}: {message}")]
    InvalidDocument { id: String, message: String },
}

/// Result type alias for synchronization and search operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type alias for index client operations.
pub type IndexResult<T> = Result<T, IndexError>;

/// Result type alias for primary store operations.
pub type StoreResult<T> = Result<T, StoreError>;

impl From<serde_json::Error> for IndexError {
    fn from(err: serde_json::Error) -> Self {
        IndexError::Serialization {
            message: err.to_string(),
        }
    }
}
