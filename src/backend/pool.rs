//! Backend that runs tasks on a fixed pool of tokio workers.
//!
//! # Scheduling
//!
//! Jobs wait in a shared priority queue: higher [`Task::priority`] first,
//! FIFO within a priority. `max_workers` workers pull from it, so at most
//! that many callables run at once.
//!
//! # Lifecycle
//!
//! - Workers are spawned on the first `enqueue`, not in the constructor, so
//!   the backend can be built before a runtime exists.
//! - Every job gets a child of the pool's shutdown token. Cancelling a key
//!   cancels only that job; `shutdown(false)` cancels them all.
//! - `shutdown(true)` closes the queue, lets the workers drain it and joins
//!   them through a [`TaskTracker`].

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::{new_cell, run_job, Backend};
use crate::constants::DEFAULT_MAX_WORKERS;
use crate::domain::TaskResult;
use crate::error::{TaskError, TaskFailure};
use crate::store::{ResultCell, SessionStore, TaskHandle};
use crate::task::Task;
use crate::types::args::TaskArgs;

struct Job {
    priority: i32,
    seq: u64,
    cell: Arc<ResultCell>,
    task: Task,
    args: TaskArgs,
}

impl Job {
    fn rank(&self) -> (i32, Reverse<u64>) {
        (self.priority, Reverse(self.seq))
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.rank() == other.rank()
    }
}

impl Eq for Job {}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Job {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.rank().cmp(&other.rank())
    }
}

#[derive(Default)]
struct QueueState {
    jobs: BinaryHeap<Job>,
    closed: bool,
}

/// Closable max-heap of jobs with async `pop`.
#[derive(Default)]
struct JobQueue {
    state: Mutex<QueueState>,
    available: Notify,
}

impl JobQueue {
    /// Adds a job, or hands it back if the queue is closed.
    fn push(&self, job: Job) -> Result<(), Job> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(job);
            }
            state.jobs.push(job);
        }
        self.available.notify_one();
        Ok(())
    }

    /// Next job by rank. Returns `None` once the queue is closed and empty.
    async fn pop(&self) -> Option<Job> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            // Register before checking so a push or close in between is not lost.
            notified.as_mut().enable();
            {
                let mut state = self.state.lock();
                if let Some(job) = state.jobs.pop() {
                    return Some(job);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_waiters();
    }

    fn drain(&self) -> Vec<Job> {
        std::mem::take(&mut self.state.lock().jobs).into_vec()
    }

    fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }
}

struct PoolShared {
    store: SessionStore,
    queue: JobQueue,
}

/// Bounded-concurrency backend backed by tokio tasks.
///
/// `enqueue` returns as soon as the job is queued. Results are picked up
/// later with `pop`/`wait*`, possibly by a different invocation that shares
/// the same backend.
///
/// Callables run on the tokio runtime that made the first `enqueue`; a
/// callable doing heavy synchronous work should move it to
/// `tokio::task::spawn_blocking`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use hook_tasks::{Backend, Task, TaskArgs, TaskStatus, WorkerPoolBackend};
/// use serde_json::json;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let backend = WorkerPoolBackend::new(2);
/// let slow = Task::new("slow", |_| async {
///     tokio::time::sleep(Duration::from_millis(50)).await;
///     anyhow::Ok(json!("done"))
/// });
///
/// let handle = backend.enqueue(&slow, TaskArgs::new(), "s1", "k").await.unwrap();
/// assert!(!handle.is_finished());
///
/// let value = backend.wait("s1", "k", Duration::from_secs(2)).await.unwrap();
/// assert_eq!(value, json!("done"));
/// assert_eq!(handle.status(), TaskStatus::Completed);
///
/// backend.shutdown(true).await.unwrap();
/// # });
/// ```
pub struct WorkerPoolBackend {
    shared: Arc<PoolShared>,
    max_workers: usize,
    workers: OnceLock<()>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    shut_down: AtomicBool,
    next_seq: AtomicU64,
}

impl fmt::Debug for WorkerPoolBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPoolBackend")
            .field("max_workers", &self.max_workers)
            .field("started", &self.workers.get().is_some())
            .field("queued", &self.shared.queue.len())
            .field("shut_down", &self.shut_down.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for WorkerPoolBackend {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WORKERS)
    }
}

impl WorkerPoolBackend {
    /// Creates a pool of `max_workers` workers (at least 1).
    ///
    /// No worker is spawned until the first `enqueue`.
    pub fn new(max_workers: usize) -> Self {
        let max_workers = if max_workers == 0 {
            tracing::warn!("max_workers must be at least 1; using 1");
            1
        } else {
            max_workers
        };
        Self {
            shared: Arc::new(PoolShared {
                store: SessionStore::new(),
                queue: JobQueue::default(),
            }),
            max_workers,
            workers: OnceLock::new(),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            shut_down: AtomicBool::new(false),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Pool size.
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Number of jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    fn ensure_workers(&self) {
        self.workers.get_or_init(|| {
            tracing::debug!(workers = self.max_workers, "starting worker pool");
            for worker in 0..self.max_workers {
                self.tracker
                    .spawn(worker_loop(worker, Arc::clone(&self.shared)));
            }
        });
    }
}

impl Drop for WorkerPoolBackend {
    fn drop(&mut self) {
        // Let workers finish what is queued and exit.
        self.shared.queue.close();
    }
}

async fn worker_loop(worker: usize, shared: Arc<PoolShared>) {
    tracing::debug!(worker, "worker started");
    while let Some(job) = shared.queue.pop().await {
        run_job(&shared.store, job.cell, job.task, job.args).await;
    }
    tracing::debug!(worker, "worker stopped");
}

#[async_trait]
impl Backend for WorkerPoolBackend {
    async fn enqueue(
        &self,
        task: &Task,
        args: TaskArgs,
        session_id: &str,
        key: &str,
    ) -> Result<TaskHandle, TaskError> {
        if self.shut_down.load(Ordering::Acquire) {
            tracing::error!(session_id, key, task = task.name(), "enqueue after shutdown");
            return Err(TaskError::ShutDown);
        }

        let cell = new_cell(task, session_id, key, self.shutdown.child_token());
        let job = Job {
            priority: task.priority(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            cell: Arc::clone(&cell),
            task: task.clone(),
            args,
        };

        // Insert before pushing: shutdown closes the queue before clearing
        // the store, so an accepted job's entry is always cleared with it.
        self.shared.store.insert(Arc::clone(&cell));
        self.ensure_workers();
        if self.shared.queue.push(job).is_err() {
            // Shutdown won the race after the flag check.
            cell.try_cancel();
            self.shared.store.remove(session_id, key, &cell);
            tracing::error!(session_id, key, task = task.name(), "enqueue after shutdown");
            return Err(TaskError::ShutDown);
        }
        tracing::debug!(
            session_id,
            key,
            task = task.name(),
            priority = task.priority(),
            "task enqueued"
        );
        Ok(TaskHandle::new(cell))
    }

    async fn get(&self, session_id: &str, key: &str) -> Option<TaskResult> {
        self.shared.store.get(session_id, key)
    }

    async fn pop(&self, session_id: &str, key: &str) -> Option<Value> {
        let value = self.shared.store.pop(session_id, key);
        tracing::debug!(session_id, key, found = value.is_some(), "pop");
        value
    }

    async fn pop_all(&self, session_id: &str) -> Vec<Value> {
        self.shared.store.pop_all(session_id)
    }

    async fn pop_errors(&self, session_id: &str) -> Vec<(String, TaskFailure)> {
        self.shared.store.pop_errors(session_id)
    }

    async fn has(&self, session_id: &str, key: Option<&str>) -> bool {
        self.shared.store.has(session_id, key)
    }

    async fn cancel(&self, session_id: &str, key: &str) -> bool {
        self.shared.store.cancel(session_id, key)
    }

    async fn wait(
        &self,
        session_id: &str,
        key: &str,
        timeout: Duration,
    ) -> Result<Value, TaskError> {
        self.shared.store.wait(session_id, key, timeout).await
    }

    async fn wait_all(
        &self,
        session_id: &str,
        keys: &[&str],
        timeout: Duration,
    ) -> Result<HashMap<String, Value>, TaskError> {
        self.shared.store.wait_all(session_id, keys, timeout).await
    }

    async fn wait_any(
        &self,
        session_id: &str,
        keys: &[&str],
        timeout: Duration,
    ) -> Result<(String, Value), TaskError> {
        self.shared.store.wait_any(session_id, keys, timeout).await
    }

    async fn shutdown(&self, wait: bool) -> Result<(), TaskError> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            tracing::error!("shutdown called twice");
            return Err(TaskError::AlreadyShutDown);
        }

        self.shared.queue.close();
        self.tracker.close();
        if wait {
            tracing::debug!("draining worker pool");
            self.tracker.wait().await;
        } else {
            let dropped = self.shared.queue.drain();
            for job in &dropped {
                job.cell.try_cancel();
            }
            self.shutdown.cancel();
            tracing::debug!(cancelled = dropped.len(), "worker pool stopping");
        }

        let cleared = self.shared.store.clear();
        tracing::debug!(cleared = cleared.len(), "worker pool shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::status::TaskStatus;
    use serde_json::json;

    fn job(priority: i32, seq: u64) -> Job {
        let task = Task::from_fn("noop", |_| Ok(Value::Null));
        Job {
            priority,
            seq,
            cell: new_cell(&task, "s", &seq.to_string(), CancellationToken::new()),
            task,
            args: TaskArgs::new(),
        }
    }

    #[tokio::test]
    async fn queue_orders_by_priority_then_fifo() {
        let queue = JobQueue::default();
        for (priority, seq) in [(0, 0), (5, 1), (0, 2), (5, 3), (-1, 4)] {
            assert!(queue.push(job(priority, seq)).is_ok());
        }
        queue.close();

        let mut order = Vec::new();
        while let Some(job) = queue.pop().await {
            order.push(job.seq);
        }
        assert_eq!(order, vec![1, 3, 0, 2, 4]);
    }

    #[tokio::test]
    async fn closed_queue_rejects_push() {
        let queue = JobQueue::default();
        queue.close();
        assert!(queue.push(job(0, 0)).is_err());
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn close_wakes_idle_pop() {
        let queue = Arc::new(JobQueue::default());
        let popper = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await.is_none() })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();
        assert!(popper.await.unwrap());
    }

    #[test]
    fn zero_workers_is_clamped() {
        assert_eq!(WorkerPoolBackend::new(0).max_workers(), 1);
        assert_eq!(WorkerPoolBackend::default().max_workers(), DEFAULT_MAX_WORKERS);
    }

    #[test]
    fn construction_needs_no_runtime() {
        let backend = WorkerPoolBackend::new(3);
        assert_eq!(backend.queued(), 0);
        assert!(format!("{backend:?}").contains("started: false"));
    }

    #[tokio::test]
    async fn enqueue_racing_shutdown_leaves_no_entry() {
        let backend = WorkerPoolBackend::new(1);
        // Queue closed but flag not yet set: the window between the
        // shutdown flag check and the push.
        backend.shared.queue.close();
        let task = Task::from_fn("one", |_| Ok(json!(1)));

        let err = backend.enqueue(&task, TaskArgs::new(), "s", "k").await.unwrap_err();
        assert!(matches!(err, TaskError::ShutDown));
        assert!(backend.get("s", "k").await.is_none());
        assert_eq!(backend.queued(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_enqueue_and_shutdown_leave_store_empty() {
        let backend = Arc::new(WorkerPoolBackend::new(2));
        let task = Task::from_fn("one", |_| Ok(json!(1)));

        let submitters: Vec<_> = (0..4)
            .map(|n| {
                let backend = Arc::clone(&backend);
                let task = task.clone();
                tokio::spawn(async move {
                    for i in 0..200 {
                        let key = format!("{n}-{i}");
                        if backend.enqueue(&task, TaskArgs::new(), "s", &key).await.is_err() {
                            break;
                        }
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(2)).await;
        backend.shutdown(false).await.unwrap();
        for submitter in submitters {
            submitter.await.unwrap();
        }

        assert!(!backend.has("s", None).await);
        assert_eq!(backend.shared.store.len(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn runs_and_shuts_down() {
        let backend = WorkerPoolBackend::new(2);
        let task = Task::from_fn("one", |_| Ok(json!(1)));
        let handle = backend.enqueue(&task, TaskArgs::new(), "s", "k").await.unwrap();

        assert_eq!(backend.wait("s", "k", Duration::from_secs(5)).await.unwrap(), json!(1));
        backend.shutdown(true).await.unwrap();
        assert_eq!(handle.status(), TaskStatus::Completed);
        assert!(matches!(
            backend.enqueue(&task, TaskArgs::new(), "s", "k").await,
            Err(TaskError::ShutDown)
        ));
    }
}
