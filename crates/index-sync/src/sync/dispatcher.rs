use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore, oneshot};
use tracing::{debug, error, trace};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncErrorKind, SyncResult};

use super::{SyncOperation, SyncOutcome, SyncTarget};

/// Per-collection dispatcher counters.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Accepted tasks not yet finished.
    pub pending: usize,

    /// Mutations that reached the index.
    pub total_synced: u64,

    /// Upserts skipped because the record was gone.
    pub total_skipped: u64,

    /// Mutations given up on.
    pub total_failed: u64,

    /// Submissions folded into an identical queued task.
    pub total_coalesced: u64,

    /// When a mutation last succeeded.
    pub last_success: Option<Instant>,
}

/// Completion handle for a dispatched mutation.
///
/// Dropping the ticket does not cancel the mutation; it only discards the
/// result.
#[derive(Debug)]
pub struct SyncTicket {
    collection: String,
    id: String,
    operation: SyncOperation,
    receiver: oneshot::Receiver<SyncOutcome>,
}

impl SyncTicket {
    /// The collection the mutation targets.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The record identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The mutation kind.
    pub fn operation(&self) -> SyncOperation {
        self.operation
    }

    /// Waits for the mutation to finish.
    pub async fn wait(self) -> SyncOutcome {
        self.receiver.await.unwrap_or(SyncOutcome::Failed {
            kind: SyncErrorKind::Dispatch,
        })
    }
}

type TaskKey = (String, String);

struct QueuedTask {
    target: Arc<dyn SyncTarget>,
    operation: SyncOperation,
    waiters: Vec<oneshot::Sender<SyncOutcome>>,
}

#[derive(Default)]
struct KeyQueue {
    waiting: VecDeque<QueuedTask>,
}

struct DispatchState {
    queues: HashMap<TaskKey, KeyQueue>,
    pending: usize,
    accepting: bool,
}

struct Inner {
    config: SyncConfig,
    runtime: Option<Handle>,
    state: Mutex<DispatchState>,
    permits: Arc<Semaphore>,
    idle: Notify,
    stats: RwLock<HashMap<String, SyncStats>>,
}

/// Runs index mutations in the background.
///
/// Mutations for the same `(collection, id)` run one at a time in submission
/// order, so an older write can never overwrite a newer one. Mutations for
/// different records run concurrently, up to `max_concurrency` at once.
///
/// A submission identical to one that is still queued (not yet started) is
/// folded into it: upserts re-read the primary store, so running the queued
/// one already picks up the latest state.
///
/// Tasks are spawned on the caller's Tokio runtime. Callers on plain threads
/// fall back to the runtime the dispatcher was created in, so a primary-store
/// write path does not need a runtime of its own.
///
/// The dispatcher is cheap to clone; clones share the same queues.
#[derive(Clone)]
pub struct SyncDispatcher {
    inner: Arc<Inner>,
}

impl SyncDispatcher {
    /// Creates a dispatcher, remembering the current Tokio runtime if any.
    pub fn new(config: SyncConfig) -> Self {
        Self::build(config, Handle::try_current().ok())
    }

    /// Creates a dispatcher that falls back to `runtime` when
    /// [`submit`](Self::submit) is called outside any runtime.
    pub fn with_runtime(config: SyncConfig, runtime: Handle) -> Self {
        Self::build(config, Some(runtime))
    }

    fn build(config: SyncConfig, runtime: Option<Handle>) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Self {
            inner: Arc::new(Inner {
                config,
                runtime,
                state: Mutex::new(DispatchState {
                    queues: HashMap::new(),
                    pending: 0,
                    accepting: true,
                }),
                permits,
                idle: Notify::new(),
                stats: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Returns the caller's runtime, or the one this dispatcher was created in.
    pub(crate) fn runtime(&self) -> Option<Handle> {
        Handle::try_current()
            .ok()
            .or_else(|| self.inner.runtime.clone())
    }

    /// Schedules a mutation and returns without waiting for it.
    ///
    /// # Errors
    ///
    /// * `SyncError::QueueFull` - `queue_capacity` tasks are already pending
    /// * `SyncError::ShuttingDown` - [`shutdown`](Self::shutdown) was called
    /// * `SyncError::NoRuntime` - called outside a Tokio runtime on a
    ///   dispatcher that was also created outside one
    pub fn submit(
        &self,
        target: Arc<dyn SyncTarget>,
        operation: SyncOperation,
        id: impl Into<String>,
    ) -> SyncResult<SyncTicket> {
        let runtime = self.runtime().ok_or(SyncError::NoRuntime)?;
        let id = id.into();
        let collection = target.collection().to_string();
        let (sender, receiver) = oneshot::channel();
        let ticket = SyncTicket {
            collection: collection.clone(),
            id: id.clone(),
            operation,
            receiver,
        };
        let key = (collection.clone(), id);

        let start_worker = {
            let mut state = self.inner.state.lock();
            if !state.accepting {
                return Err(SyncError::ShuttingDown);
            }

            if let Some(queue) = state.queues.get_mut(&key) {
                if let Some(last) = queue.waiting.back_mut() {
                    if last.operation == operation {
                        last.waiters.push(sender);
                        self.inner
                            .stats
                            .write()
                            .entry(collection.clone())
                            .or_default()
                            .total_coalesced += 1;
                        trace!(
                            collection = %key.0,
                            id = %key.1,
                            %operation,
                            "Coalesced sync task"
                        );
                        return Ok(ticket);
                    }
                }
            }

            if state.pending >= self.inner.config.queue_capacity {
                return Err(SyncError::QueueFull {
                    pending: state.pending,
                    capacity: self.inner.config.queue_capacity,
                });
            }
            state.pending += 1;
            self.inner
                .stats
                .write()
                .entry(collection)
                .or_default()
                .pending += 1;

            let task = QueuedTask {
                target,
                operation,
                waiters: vec![sender],
            };

            // A key with a queue already has a worker draining it
            match state.queues.get_mut(&key) {
                Some(queue) => {
                    queue.waiting.push_back(task);
                    false
                }
                None => {
                    let mut queue = KeyQueue::default();
                    queue.waiting.push_back(task);
                    state.queues.insert(key.clone(), queue);
                    true
                }
            }
        };

        if start_worker {
            let inner = self.inner.clone();
            runtime.spawn(async move { inner.drain(key).await });
        }

        Ok(ticket)
    }

    /// Returns the number of accepted tasks that have not finished.
    pub fn pending(&self) -> usize {
        self.inner.state.lock().pending
    }

    /// Returns true while new submissions are accepted.
    pub fn is_accepting(&self) -> bool {
        self.inner.state.lock().accepting
    }

    /// Returns the counters for a collection.
    pub fn stats(&self, collection: &str) -> Option<SyncStats> {
        self.inner.stats.read().get(collection).cloned()
    }

    /// Returns the counters for every collection seen so far.
    pub fn all_stats(&self) -> HashMap<String, SyncStats> {
        self.inner.stats.read().clone()
    }

    /// Waits until no task is pending. Returns false on timeout.
    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.pending() == 0 {
                return true;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.pending() == 0;
            }
        }
    }

    /// Stops accepting new tasks and waits for accepted ones to finish.
    pub async fn shutdown(&self) {
        self.inner.state.lock().accepting = false;
        debug!(pending = self.pending(), "Sync dispatcher shutting down");

        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Inner {
    /// Runs the tasks queued for one key until the queue is empty.
    async fn drain(self: Arc<Self>, key: TaskKey) {
        loop {
            let task = {
                let mut state = self.state.lock();
                let next = state
                    .queues
                    .get_mut(&key)
                    .and_then(|queue| queue.waiting.pop_front());
                match next {
                    Some(task) => task,
                    None => {
                        state.queues.remove(&key);
                        return;
                    }
                }
            };

            // The semaphore is never closed
            let permit = self.permits.clone().acquire_owned().await.ok();
            let outcome = AssertUnwindSafe(task.target.apply(task.operation, &key.1))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    error!(
                        collection = %key.0,
                        id = %key.1,
                        operation = %task.operation,
                        "Sync task panicked"
                    );
                    SyncOutcome::Failed {
                        kind: SyncErrorKind::Dispatch,
                    }
                });
            drop(permit);

            self.record(&key.0, outcome);
            {
                let mut state = self.state.lock();
                state.pending = state.pending.saturating_sub(1);
                if state.pending == 0 {
                    self.idle.notify_waiters();
                }
            }

            for waiter in task.waiters {
                let _ = waiter.send(outcome);
            }
        }
    }

    fn record(&self, collection: &str, outcome: SyncOutcome) {
        let mut stats = self.stats.write();
        let entry = stats.entry(collection.to_string()).or_default();
        entry.pending = entry.pending.saturating_sub(1);
        match outcome {
            SyncOutcome::Indexed | SyncOutcome::Removed => {
                entry.total_synced += 1;
                entry.last_success = Some(Instant::now());
            }
            SyncOutcome::Skipped => entry.total_skipped += 1,
            SyncOutcome::Failed { .. } => entry.total_failed += 1,
        }
    }
}

impl std::fmt::Debug for SyncDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncDispatcher")
            .field("config", &self.inner.config)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}
