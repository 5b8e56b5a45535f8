//! Bulk re-indexing.
//!
//! Failed mutations are reported and dropped, so the index can drift from
//! the primary store. A reindex job walks every identifier the store lists
//! and schedules an upsert for each one through the regular dispatcher, so
//! re-indexed writes are serialized with live traffic for the same record.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::codec::DocumentCodec;
use crate::error::{SyncError, SyncErrorKind};
use crate::facade::SearchFacade;
use crate::store::RecordScan;
use crate::sync::{SyncDispatcher, SyncOperation, SyncOutcome, SyncTarget, SyncTicket};

/// Errors from reindex job management.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReindexError {
    /// No job with this identifier is known.
    #[error("reindex job not found: {job_id}")]
    JobNotFound {
        /// The unknown job identifier.
        job_id: String,
    },
}

/// Request to start a reindex job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReindexRequest {
    /// Number of identifiers listed and scheduled per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Identifier to resume after (exclusive). `None` starts from the
    /// beginning.
    #[serde(default)]
    pub resume_after: Option<String>,
}

fn default_batch_size() -> u32 {
    100
}

impl Default for ReindexRequest {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            resume_after: None,
        }
    }
}

impl ReindexRequest {
    /// Creates a request covering every record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, size: u32) -> Self {
        self.batch_size = size;
        self
    }

    /// Resumes after the given identifier.
    pub fn resume_after(mut self, id: impl Into<String>) -> Self {
        self.resume_after = Some(id.into());
        self
    }
}

/// Status of a reindex job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReindexStatus {
    /// Reindex is queued but not started.
    Queued,
    /// Reindex is currently running.
    InProgress,
    /// Reindex completed.
    Completed,
    /// Reindex stopped on a store error.
    Failed,
    /// Reindex was cancelled.
    Cancelled,
}

impl ReindexStatus {
    /// Returns true if the job is still running.
    pub fn is_running(&self) -> bool {
        matches!(self, ReindexStatus::Queued | ReindexStatus::InProgress)
    }

    /// Returns true if the job has finished (success, failure, or cancelled).
    pub fn is_finished(&self) -> bool {
        !self.is_running()
    }
}

/// A record that could not be re-indexed.
#[derive(Debug, Clone, Serialize)]
pub struct ReindexProgressError {
    /// Record identifier.
    pub id: String,
    /// Classification of the failure.
    pub kind: SyncErrorKind,
}

/// Progress of a reindex job.
#[derive(Debug, Clone, Serialize)]
pub struct ReindexProgress {
    /// Unique job identifier.
    pub job_id: String,

    /// Collection being re-indexed.
    pub collection: String,

    /// Current status.
    pub status: ReindexStatus,

    /// Identifiers listed by the store so far.
    pub listed: u64,

    /// Identifiers whose upsert has finished.
    pub processed: u64,

    /// Documents written.
    pub indexed: u64,

    /// Records that disappeared before they could be read.
    pub skipped: u64,

    /// Records that failed.
    pub errors: Vec<ReindexProgressError>,

    /// Last identifier fully processed; resume point after a failure.
    pub last_id: Option<String>,

    /// When the job was started.
    pub started_at: Option<String>,

    /// When the job finished.
    pub completed_at: Option<String>,

    /// Error message if status is Failed.
    pub error_message: Option<String>,
}

impl ReindexProgress {
    /// Creates a new progress tracker for a job.
    pub fn new(job_id: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            collection: collection.into(),
            status: ReindexStatus::Queued,
            listed: 0,
            processed: 0,
            indexed: 0,
            skipped: 0,
            errors: Vec::new(),
            last_id: None,
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }

    /// Returns true if any record failed or the job itself failed.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty() || self.error_message.is_some()
    }
}

type JobMap = Arc<RwLock<HashMap<String, ReindexProgress>>>;

/// Manages reindex jobs.
pub struct ReindexOperation {
    dispatcher: SyncDispatcher,
    jobs: JobMap,
    cancel_channels: Arc<RwLock<HashMap<String, mpsc::Sender<()>>>>,
}

impl ReindexOperation {
    /// Creates a job manager that schedules through `dispatcher`.
    pub fn new(dispatcher: SyncDispatcher) -> Self {
        Self {
            dispatcher,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            cancel_channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Starts re-indexing the facade's collection from `scan`.
    pub fn start_for<C: DocumentCodec>(
        &self,
        facade: &SearchFacade<C>,
        scan: Arc<dyn RecordScan>,
        request: ReindexRequest,
    ) -> String {
        self.start(facade.synchronizer().clone(), scan, request)
    }

    /// Starts a reindex job.
    ///
    /// Returns immediately with a job ID. The job runs in the background on
    /// the dispatcher's runtime. Without one the job is recorded as failed.
    pub fn start(
        &self,
        target: Arc<dyn SyncTarget>,
        scan: Arc<dyn RecordScan>,
        request: ReindexRequest,
    ) -> String {
        let job_id = Uuid::new_v4().to_string();
        let progress = ReindexProgress::new(&job_id, target.collection());
        self.jobs.write().insert(job_id.clone(), progress);

        let Some(runtime) = self.dispatcher.runtime() else {
            tracing::error!(job_id = %job_id, "No runtime to run reindex job");
            if let Some(p) = self.jobs.write().get_mut(&job_id) {
                p.status = ReindexStatus::Failed;
                p.error_message = Some(SyncError::NoRuntime.to_string());
                p.completed_at = Some(chrono::Utc::now().to_rfc3339());
            }
            return job_id;
        };

        let (tx, rx) = mpsc::channel::<()>(1);
        self.cancel_channels.write().insert(job_id.clone(), tx);

        let job = ReindexJob {
            job_id: job_id.clone(),
            target,
            scan,
            request,
            dispatcher: self.dispatcher.clone(),
            jobs: self.jobs.clone(),
            cancel: rx,
        };
        runtime.spawn(job.run());

        job_id
    }

    /// Gets the progress of a reindex job.
    pub fn get_progress(&self, job_id: &str) -> Option<ReindexProgress> {
        self.jobs.read().get(job_id).cloned()
    }

    /// Waits for a job to finish. Returns its last known progress, which is
    /// still running if the timeout elapsed first.
    pub async fn wait_for_completion(
        &self,
        job_id: &str,
        timeout: Duration,
    ) -> Option<ReindexProgress> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let progress = self.get_progress(job_id)?;
            if progress.status.is_finished() || tokio::time::Instant::now() >= deadline {
                return Some(progress);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Cancels a running reindex job. Upserts already scheduled still run.
    pub async fn cancel(&self, job_id: &str) -> Result<(), ReindexError> {
        {
            let jobs = self.jobs.read();
            let progress = jobs.get(job_id).ok_or_else(|| ReindexError::JobNotFound {
                job_id: job_id.to_string(),
            })?;

            if !progress.status.is_running() {
                return Ok(());
            }
        }

        let sender = self.cancel_channels.read().get(job_id).cloned();
        if let Some(tx) = sender {
            let _ = tx.send(()).await;
        }

        {
            let mut jobs = self.jobs.write();
            if let Some(progress) = jobs.get_mut(job_id) {
                progress.status = ReindexStatus::Cancelled;
                progress.completed_at = Some(chrono::Utc::now().to_rfc3339());
            }
        }

        tracing::info!(job_id = %job_id, "Reindex job cancelled");
        Ok(())
    }

    /// Lists all jobs (active and recent).
    pub fn list_jobs(&self) -> Vec<ReindexProgress> {
        self.jobs.read().values().cloned().collect()
    }

    /// Removes finished jobs older than the specified duration.
    pub fn cleanup_old_jobs(&self, max_age_seconds: i64) {
        let cutoff = chrono::Utc::now() - chrono::Duration::seconds(max_age_seconds);

        let mut jobs = self.jobs.write();
        let mut channels = self.cancel_channels.write();

        jobs.retain(|job_id, progress| {
            if progress.status.is_finished() {
                if let Some(ref completed_at) = progress.completed_at {
                    if let Ok(completed) = chrono::DateTime::parse_from_rfc3339(completed_at) {
                        if completed.with_timezone(&chrono::Utc) < cutoff {
                            channels.remove(job_id);
                            return false;
                        }
                    }
                }
            }
            true
        });
    }
}

impl std::fmt::Debug for ReindexOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReindexOperation")
            .field("active_jobs", &self.jobs.read().len())
            .finish()
    }
}

struct ReindexJob {
    job_id: String,
    target: Arc<dyn SyncTarget>,
    scan: Arc<dyn RecordScan>,
    request: ReindexRequest,
    dispatcher: SyncDispatcher,
    jobs: JobMap,
    cancel: mpsc::Receiver<()>,
}

impl ReindexJob {
    fn update(&self, f: impl FnOnce(&mut ReindexProgress)) {
        if let Some(progress) = self.jobs.write().get_mut(&self.job_id) {
            f(progress);
        }
    }

    fn cancelled(&mut self) -> bool {
        self.cancel.try_recv().is_ok()
            || self
                .jobs
                .read()
                .get(&self.job_id)
                .is_none_or(|p| p.status == ReindexStatus::Cancelled)
    }

    async fn run(mut self) {
        self.update(|p| {
            p.status = ReindexStatus::InProgress;
            p.started_at = Some(chrono::Utc::now().to_rfc3339());
        });
        tracing::info!(
            job_id = %self.job_id,
            collection = %self.target.collection(),
            batch_size = self.request.batch_size,
            "Reindex job started"
        );

        let batch_size = self.request.batch_size.max(1) as usize;
        let mut after = self.request.resume_after.clone();

        loop {
            if self.cancelled() {
                return;
            }

            let ids = match self.scan.list_ids(after.as_deref(), batch_size).await {
                Ok(ids) => ids,
                Err(e) => {
                    tracing::error!(job_id = %self.job_id, error = %e, "Reindex job failed");
                    self.update(|p| {
                        if p.status == ReindexStatus::InProgress {
                            p.status = ReindexStatus::Failed;
                            p.error_message = Some(e.to_string());
                            p.completed_at = Some(chrono::Utc::now().to_rfc3339());
                        }
                    });
                    return;
                }
            };

            if ids.is_empty() {
                break;
            }
            self.update(|p| p.listed += ids.len() as u64);

            let mut tickets = Vec::with_capacity(ids.len());
            for id in &ids {
                match self.submit(id).await {
                    Ok(ticket) => tickets.push((id.clone(), Some(ticket))),
                    Err(kind) => {
                        tracing::warn!(
                            job_id = %self.job_id,
                            id = %id,
                            kind = %kind,
                            "Reindex upsert not accepted"
                        );
                        tickets.push((id.clone(), None));
                        self.update(|p| {
                            p.errors.push(ReindexProgressError {
                                id: id.clone(),
                                kind,
                            })
                        });
                    }
                }
            }

            // Finishing each batch before listing the next bounds the queue
            for (id, ticket) in tickets {
                let outcome = match ticket {
                    Some(ticket) => Some(ticket.wait().await),
                    None => None,
                };
                self.update(|p| {
                    p.processed += 1;
                    match outcome {
                        Some(SyncOutcome::Indexed) => p.indexed += 1,
                        Some(SyncOutcome::Skipped) => p.skipped += 1,
                        Some(SyncOutcome::Failed { kind }) => p.errors.push(ReindexProgressError {
                            id: id.clone(),
                            kind,
                        }),
                        Some(SyncOutcome::Removed) | None => {}
                    }
                });
            }

            after = ids.last().cloned();
            let last = after.clone();
            self.update(|p| p.last_id = last);
        }

        self.update(|p| {
            if p.status == ReindexStatus::InProgress {
                p.status = ReindexStatus::Completed;
                p.completed_at = Some(chrono::Utc::now().to_rfc3339());
            }
        });
        tracing::info!(job_id = %self.job_id, "Reindex job completed");
    }

    /// Submits one upsert, waiting for room when the queue is full.
    async fn submit(&self, id: &str) -> Result<SyncTicket, SyncErrorKind> {
        loop {
            match self
                .dispatcher
                .submit(self.target.clone(), SyncOperation::Upsert, id)
            {
                Ok(ticket) => return Ok(ticket),
                Err(SyncError::QueueFull { .. }) => {
                    self.dispatcher
                        .wait_for_idle(Duration::from_millis(50))
                        .await;
                }
                Err(e) => return Err(e.kind()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{StoreError, StoreResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    struct NoopTarget;

    #[async_trait]
    impl SyncTarget for NoopTarget {
        fn collection(&self) -> &str {
            "task"
        }

        async fn apply(&self, _operation: SyncOperation, _id: &str) -> SyncOutcome {
            SyncOutcome::Indexed
        }
    }

    /// Blocks every listing until the gate opens, then fails it.
    struct GatedFailingScan {
        gate: Semaphore,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RecordScan for GatedFailingScan {
        async fn list_ids(
            &self,
            _after: Option<&str>,
            _limit: usize,
        ) -> StoreResult<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
            Err(StoreError::Unavailable {
                message: "store offline".to_string(),
            })
        }
    }

    #[test]
    fn test_reindex_request() {
        let req = ReindexRequest::all()
            .with_batch_size(50)
            .resume_after("m-100");
        assert_eq!(req.batch_size, 50);
        assert_eq!(req.resume_after.as_deref(), Some("m-100"));
    }

    #[test]
    fn test_reindex_request_defaults_from_json() {
        let req: ReindexRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.batch_size, 100);
        assert!(req.resume_after.is_none());
    }

    #[test]
    fn test_reindex_status() {
        assert!(ReindexStatus::InProgress.is_running());
        assert!(!ReindexStatus::Completed.is_running());
        assert!(ReindexStatus::Completed.is_finished());
        assert!(ReindexStatus::Failed.is_finished());
        assert!(ReindexStatus::Cancelled.is_finished());
    }

    #[test]
    fn test_reindex_progress_errors() {
        let mut progress = ReindexProgress::new("job-123", "task");
        assert!(!progress.has_errors());

        progress.errors.push(ReindexProgressError {
            id: "t1".to_string(),
            kind: SyncErrorKind::IndexRejected,
        });
        assert!(progress.has_errors());
    }

    #[tokio::test]
    async fn test_cancel_unknown_job() {
        let op = ReindexOperation::new(SyncDispatcher::new(Default::default()));
        assert_eq!(
            op.cancel("nope").await,
            Err(ReindexError::JobNotFound {
                job_id: "nope".to_string()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_listing_failure_keeps_cancelled_status() {
        let op = ReindexOperation::new(SyncDispatcher::new(Default::default()));
        let scan = Arc::new(GatedFailingScan {
            gate: Semaphore::new(0),
            calls: AtomicUsize::new(0),
        });
        let job_id = op.start(Arc::new(NoopTarget), scan.clone(), ReindexRequest::all());

        while scan.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        op.cancel(&job_id).await.unwrap();
        scan.gate.add_permits(1);
        // Paused time only advances once the job task has gone idle
        tokio::time::sleep(Duration::from_millis(100)).await;

        let progress = op.get_progress(&job_id).unwrap();
        assert_eq!(progress.status, ReindexStatus::Cancelled);
        assert!(progress.error_message.is_none());
    }

    #[test]
    fn test_start_without_runtime_fails_the_job() {
        let op = ReindexOperation::new(SyncDispatcher::new(Default::default()));
        let scan = Arc::new(GatedFailingScan {
            gate: Semaphore::new(0),
            calls: AtomicUsize::new(0),
        });
        let job_id = op.start(Arc::new(NoopTarget), scan.clone(), ReindexRequest::all());

        let progress = op.get_progress(&job_id).unwrap();
        assert_eq!(progress.status, ReindexStatus::Failed);
        assert!(progress.error_message.is_some());
        assert_eq!(scan.calls.load(Ordering::SeqCst), 0);
    }
}
