//! Failure reporting for index mutations.

use std::fmt;

use serde::Serialize;

use crate::error::SyncErrorKind;

use super::SyncOperation;

/// A mutation that was given up on.
#[derive(Debug, Clone, Serialize)]
pub struct SyncFailure {
    /// Collection the record belongs to.
    pub collection: String,
    /// Record identifier.
    pub id: String,
    /// The operation that failed.
    pub operation: SyncOperation,
    /// Classification of the final error.
    pub kind: SyncErrorKind,
    /// Error message of the final attempt.
    pub message: String,
    /// Number of attempts made, including the first.
    pub attempts: u32,
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}/{} failed after {} attempt(s) [{}]: {}",
            self.operation, self.collection, self.id, self.attempts, self.kind, self.message
        )
    }
}

/// Receives mutation failures.
///
/// Mutations run detached from the caller that triggered them, so this is
/// the only place their failures surface. Implementations must not block.
pub trait SyncReporter: Send + Sync {
    /// Called once per failed mutation, after retries are exhausted.
    fn report(&self, failure: &SyncFailure);
}

/// Reports failures as `error!` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl SyncReporter for TracingReporter {
    fn report(&self, failure: &SyncFailure) {
        tracing::error!(
            collection = %failure.collection,
            id = %failure.id,
            operation = %failure.operation,
            kind = %failure.kind,
            attempts = failure.attempts,
            error = %failure.message,
            "Index sync failed"
        );
    }
}
