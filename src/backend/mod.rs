//! Execution backends and the [`Backend`] contract they share.
//!
//! A backend owns a session store (`session_id -> key -> TaskResult`) and
//! decides how enqueued work is run:
//!
//! - [`ImmediateBackend`] - runs the callable inside `enqueue`.
//! - [`WorkerPoolBackend`] - hands jobs to a fixed pool of tokio workers
//!   pulling from a priority queue.
//!
//! Every operation is async so a durable or networked backend can implement
//! the same trait and be swapped in without touching handlers.
//!
//! [`BackendConfig`] builds either in-memory backend from serde-loaded
//! settings.

pub mod immediate;
pub mod pool;

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::Instrument;

use crate::constants::DEFAULT_MAX_WORKERS;
use crate::domain::TaskResult;
use crate::error::{TaskError, TaskFailure};
use crate::store::{ResultCell, SessionStore};
use crate::task::Task;
use crate::types::args::TaskArgs;

pub use crate::store::TaskHandle;
pub use immediate::ImmediateBackend;
pub use pool::WorkerPoolBackend;

/// Execution and storage strategy for background tasks.
///
/// All results are scoped by `session_id`: an operation never observes or
/// touches another session's entries. Within a session, `key` identifies at
/// most one live result; enqueuing under an existing key atomically replaces
/// the previous entry.
///
/// Absence (never enqueued, already popped, expired) is reported as `None`
/// or `false`, never as an error. Task failures are stored and surface only
/// through [`pop_errors`](Backend::pop_errors) and the `wait*` family.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use hook_tasks::{Backend, Task, TaskArgs, WorkerPoolBackend};
/// use serde_json::json;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let backend: Arc<dyn Backend> = Arc::new(WorkerPoolBackend::new(2));
/// let square = Task::from_fn("square", |args| {
///     let n: i64 = args.get(0)?;
///     Ok(json!(n * n))
/// });
///
/// backend
///     .enqueue(&square, TaskArgs::from([json!(7)]), "s1", "sq")
///     .await
///     .unwrap();
/// let value = backend.wait("s1", "sq", Duration::from_secs(5)).await.unwrap();
/// assert_eq!(value, json!(49));
///
/// backend.shutdown(true).await.unwrap();
/// # });
/// ```
#[async_trait]
pub trait Backend: Send + Sync {
    /// Stores a new `Pending` result under `(session_id, key)`, replacing
    /// any previous entry, and schedules `task` with `args`.
    ///
    /// The returned handle keeps observing this particular enqueue even if
    /// the entry is later replaced or evicted.
    ///
    /// # Errors
    ///
    /// - [`TaskError::ShutDown`] if the backend has been shut down.
    async fn enqueue(
        &self,
        task: &Task,
        args: TaskArgs,
        session_id: &str,
        key: &str,
    ) -> Result<TaskHandle, TaskError>;

    /// Returns a snapshot of the result, or `None` if it is missing or has
    /// expired. Expired entries are evicted.
    async fn get(&self, session_id: &str, key: &str) -> Option<TaskResult>;

    /// Removes a `Completed` result and returns its value.
    ///
    /// Returns `None` without removing anything while the result is
    /// `Pending`, `Running` or `Failed` (failed results stay for
    /// [`pop_errors`](Backend::pop_errors)). `Cancelled` and expired results
    /// are removed and yield `None`.
    async fn pop(&self, session_id: &str, key: &str) -> Option<Value>;

    /// Removes every `Completed` result of the session and returns the
    /// values.
    async fn pop_all(&self, session_id: &str) -> Vec<Value>;

    /// Removes every `Failed` result of the session and returns each key
    /// with the error the task produced.
    async fn pop_errors(&self, session_id: &str) -> Vec<(String, TaskFailure)>;

    /// Returns `true` if `key` (or, when `None`, any key of the session)
    /// holds a `Completed` result.
    async fn has(&self, session_id: &str, key: Option<&str>) -> bool;

    /// Requests cancellation of a `Pending` or `Running` result.
    ///
    /// Returns `false` if the result is missing or already terminal.
    async fn cancel(&self, session_id: &str, key: &str) -> bool;

    /// Waits for one result and pops it once `Completed`.
    ///
    /// A missing key is waited for like a pending one.
    ///
    /// # Errors
    ///
    /// - [`TaskError::Failed`] if the task failed (the entry is kept).
    /// - [`TaskError::Cancelled`] if the task was cancelled.
    /// - [`TaskError::Timeout`] if `timeout` elapses first.
    async fn wait(
        &self,
        session_id: &str,
        key: &str,
        timeout: Duration,
    ) -> Result<Value, TaskError>;

    /// Waits until every key is `Completed`, then pops them together.
    ///
    /// All keys share one deadline. An empty key list returns an empty map.
    ///
    /// # Errors
    ///
    /// - [`TaskError::Failed`] / [`TaskError::Cancelled`] as soon as any key
    ///   fails; nothing is popped.
    /// - [`TaskError::Timeout`] if `timeout` elapses first.
    async fn wait_all(
        &self,
        session_id: &str,
        keys: &[&str],
        timeout: Duration,
    ) -> Result<HashMap<String, Value>, TaskError>;

    /// Waits until any key is `Completed` and pops that one.
    ///
    /// Keys are checked in argument order. A failed key does not end the
    /// wait while another key may still complete.
    ///
    /// # Errors
    ///
    /// - [`TaskError::EmptyKeys`] if `keys` is empty.
    /// - The first key's [`TaskError::Failed`] / [`TaskError::Cancelled`]
    ///   if every key failed or was cancelled.
    /// - [`TaskError::Timeout`] if `timeout` elapses first.
    async fn wait_any(
        &self,
        session_id: &str,
        keys: &[&str],
        timeout: Duration,
    ) -> Result<(String, Value), TaskError>;

    /// Stops accepting work and clears every session.
    ///
    /// With `wait = true`, returns once every accepted job has reached a
    /// terminal state. With `wait = false`, queued jobs are cancelled,
    /// running jobs are asked to stop, and the call returns promptly.
    ///
    /// # Errors
    ///
    /// - [`TaskError::AlreadyShutDown`] on a second call.
    async fn shutdown(&self, wait: bool) -> Result<(), TaskError>;
}

/// Creates the `Pending` cell for one enqueue.
pub(crate) fn new_cell(
    task: &Task,
    session_id: &str,
    key: &str,
    cancel: tokio_util::sync::CancellationToken,
) -> Arc<ResultCell> {
    let result = TaskResult::new(session_id, key)
        .with_ttl(task.ttl())
        .with_task_name(task.name());
    ResultCell::new(result, cancel)
}

/// Drives one job through `Running` to a terminal state.
///
/// A job whose cell is no longer `Pending` (cancelled while queued) is
/// skipped. Panics inside the callable are recorded as failures. The cell's
/// cancellation token interrupts the callable at its next `.await`.
pub(crate) async fn run_job(store: &SessionStore, cell: Arc<ResultCell>, task: Task, args: TaskArgs) {
    let span = {
        let result = cell.lock();
        tracing::info_span!(
            "task",
            session_id = %result.session_id(),
            key = %result.key(),
            task = %task.name(),
            id = %result.id(),
        )
    };
    execute(store, cell, task, args).instrument(span).await;
}

async fn execute(store: &SessionStore, cell: Arc<ResultCell>, task: Task, args: TaskArgs) {
    if cell.lock().set_running().is_err() {
        tracing::debug!("skipping job that is no longer pending");
        return;
    }
    store.notify();

    let cancel = cell.cancel_token().clone();
    let outcome = tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        outcome = AssertUnwindSafe(task.call(args)).catch_unwind() => Some(outcome),
    };

    let recorded = {
        let mut result = cell.lock();
        match outcome {
            Some(Ok(Ok(value))) => result.set_completed(value),
            Some(Ok(Err(err))) => {
                let failure = TaskFailure::new(err);
                tracing::warn!(error = %format_args!("{failure:#}"), "task failed");
                result.set_failed(failure)
            },
            Some(Err(panic)) => {
                let failure = TaskFailure::from_panic(panic);
                tracing::warn!(error = %failure, "task panicked");
                result.set_failed(failure)
            },
            None if result.is_finished() => Ok(()),
            None => result.set_cancelled(),
        }
    };
    match recorded {
        Ok(()) => tracing::debug!("task finished"),
        // Lost a race with `cancel`; the cancellation stands.
        Err(err) => tracing::debug!(error = %err, "discarding late task outcome"),
    }
    store.notify();
}

/// Which in-memory backend [`BackendConfig::build`] creates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// [`ImmediateBackend`].
    Immediate,
    /// [`WorkerPoolBackend`].
    #[default]
    WorkerPool,
}

/// Serde-loadable backend settings.
///
/// # Defaults
///
/// | Setting       | Default       | Description                         |
/// |---------------|---------------|-------------------------------------|
/// | `kind`        | `worker_pool` | Which backend to build              |
/// | `max_workers` | 4             | Pool size (ignored by `immediate`)  |
///
/// # Examples
///
/// ```
/// use hook_tasks::{BackendConfig, BackendKind};
///
/// let config: BackendConfig =
///     serde_json::from_str(r#"{ "kind": "immediate" }"#).unwrap();
/// assert_eq!(config.kind, BackendKind::Immediate);
/// assert_eq!(config.max_workers, 4);
///
/// let config = BackendConfig::default().with_max_workers(8);
/// assert_eq!(config.kind, BackendKind::WorkerPool);
/// assert_eq!(config.max_workers, 8);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend implementation.
    pub kind: BackendKind,

    /// Number of pool workers. Values below 1 are raised to 1.
    pub max_workers: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }
}

impl BackendConfig {
    /// Sets the backend kind.
    pub fn with_kind(mut self, kind: BackendKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the pool size.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Builds the configured backend.
    ///
    /// Does not need a tokio runtime; pool workers start on first enqueue.
    pub fn build(&self) -> Arc<dyn Backend> {
        match self.kind {
            BackendKind::Immediate => Arc::new(ImmediateBackend::new()),
            BackendKind::WorkerPool => Arc::new(WorkerPoolBackend::new(self.max_workers)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::status::TaskStatus;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn cell_for(task: &Task) -> Arc<ResultCell> {
        new_cell(task, "s", "k", CancellationToken::new())
    }

    #[test]
    fn new_cell_carries_task_settings() {
        let task = Task::from_fn("named", |_| Ok(Value::Null)).with_ttl(Duration::from_secs(9));
        let cell = cell_for(&task);
        let result = cell.snapshot();
        assert_eq!(result.task_name(), "named");
        assert_eq!(result.ttl(), Duration::from_secs(9));
        assert_eq!(result.status(), TaskStatus::Pending);
    }

    #[tokio::test]
    async fn run_job_records_value() {
        let store = SessionStore::new();
        let task = Task::from_fn("one", |_| Ok(json!(1)));
        let cell = cell_for(&task);
        run_job(&store, Arc::clone(&cell), task, TaskArgs::new()).await;
        assert_eq!(cell.snapshot().value(), Some(&json!(1)));
    }

    #[tokio::test]
    async fn run_job_records_panic_as_failure() {
        let store = SessionStore::new();
        let task = Task::from_fn("boom", |_| panic!("kaboom"));
        let cell = cell_for(&task);
        run_job(&store, Arc::clone(&cell), task, TaskArgs::new()).await;

        let result = cell.snapshot();
        assert_eq!(result.status(), TaskStatus::Failed);
        assert_eq!(result.error().unwrap().to_string(), "task panicked: kaboom");
    }

    #[tokio::test]
    async fn run_job_skips_cancelled_cell() {
        let store = SessionStore::new();
        let task = Task::from_fn("never", |_| Ok(json!("ran")));
        let cell = cell_for(&task);
        assert!(cell.try_cancel());
        run_job(&store, Arc::clone(&cell), task, TaskArgs::new()).await;

        let result = cell.snapshot();
        assert_eq!(result.status(), TaskStatus::Cancelled);
        assert!(result.started_at().is_none());
    }

    #[tokio::test]
    async fn token_interrupts_running_job() {
        let task = Task::new("sleepy", |_| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            anyhow::Ok(json!("late"))
        });
        let token = CancellationToken::new();
        let cell = new_cell(&task, "s", "k", token.clone());

        let job = {
            let cell = Arc::clone(&cell);
            tokio::spawn(async move {
                let store = SessionStore::new();
                run_job(&store, cell, task, TaskArgs::new()).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        job.await.unwrap();

        assert_eq!(cell.status(), TaskStatus::Cancelled);
    }

    #[test]
    fn config_defaults_and_serde() {
        let config = BackendConfig::default();
        assert_eq!(config.kind, BackendKind::WorkerPool);
        assert_eq!(config.max_workers, DEFAULT_MAX_WORKERS);

        let config: BackendConfig =
            serde_json::from_value(json!({ "kind": "worker_pool", "max_workers": 2 })).unwrap();
        assert_eq!(config.max_workers, 2);

        let encoded = serde_json::to_value(BackendConfig::default().with_kind(BackendKind::Immediate))
            .unwrap();
        assert_eq!(encoded["kind"], json!("immediate"));
    }
}
