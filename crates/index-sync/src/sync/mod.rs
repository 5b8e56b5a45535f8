//! Synchronization of the search index with the primary store.
//!
//! The [`Synchronizer`] turns primary-store events into index mutations for
//! one collection. The [`SyncDispatcher`] runs those mutations detached from
//! the caller, one at a time per record and concurrently across records.
//!
//! # Failure policy
//!
//! | Error | Handling |
//! |-------|----------|
//! | record missing at read time | no-op (`SyncOutcome::Skipped`) |
//! | `IndexError::Unavailable`, `StoreError::Unavailable` | retried with exponential backoff, then reported |
//! | anything else | reported immediately |
//!
//! Failures never reach the code that wrote to the primary store; they go to
//! a [`SyncReporter`].

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::SyncErrorKind;

mod dispatcher;
mod reporter;
mod synchronizer;

pub use dispatcher::{SyncDispatcher, SyncStats, SyncTicket};
pub use reporter::{SyncFailure, SyncReporter, TracingReporter};
pub use synchronizer::Synchronizer;

/// An index mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    /// Re-read the record and replace its document.
    Upsert,
    /// Remove the document.
    Delete,
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOperation::Upsert => f.write_str("upsert"),
            SyncOperation::Delete => f.write_str("delete"),
        }
    }
}

/// How a mutation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The document was written.
    Indexed,
    /// The document was removed (or was already absent).
    Removed,
    /// The record no longer exists in the primary store; nothing was written.
    Skipped,
    /// The mutation was given up on and reported.
    Failed {
        /// Classification of the final error.
        kind: SyncErrorKind,
    },
}

impl SyncOutcome {
    /// Returns true unless the mutation failed.
    pub fn is_success(&self) -> bool {
        !matches!(self, SyncOutcome::Failed { .. })
    }
}

/// A collection whose documents the dispatcher can mutate.
///
/// Implemented by [`Synchronizer`]; the dispatcher only sees this
/// object-safe view so one dispatcher can serve every entity type.
#[async_trait]
pub trait SyncTarget: Send + Sync {
    /// The collection this target writes to.
    fn collection(&self) -> &str;

    /// Applies one mutation for `id`. Never fails; failures are reported and
    /// returned as [`SyncOutcome::Failed`].
    async fn apply(&self, operation: SyncOperation, id: &str) -> SyncOutcome;
}
