//! Mock backend for handler tests.
//!
//! [`MockBackend`] records every enqueue without running anything. Tests
//! stage the results they want a later invocation to find with
//! [`set_result`](MockBackend::set_result),
//! [`set_failure`](MockBackend::set_failure) and
//! [`set_pending`](MockBackend::set_pending); every retrieval operation then
//! behaves exactly like the in-memory backends. **Never use in production.**
//!
//! Available to downstream crates with the `test-helpers` feature.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::backend::{new_cell, Backend};
use crate::domain::TaskResult;
use crate::error::{TaskError, TaskFailure};
use crate::store::{ResultCell, SessionStore, TaskHandle};
use crate::task::Task;
use crate::types::args::TaskArgs;

/// One call to [`Backend::enqueue`] seen by a [`MockBackend`].
#[derive(Debug, Clone, PartialEq)]
pub struct EnqueueRecord {
    /// Name of the enqueued task.
    pub task_name: String,
    /// Arguments it was enqueued with.
    pub args: TaskArgs,
    /// Session it was enqueued under.
    pub session_id: String,
    /// Key it was enqueued under.
    pub key: String,
    /// Task priority at enqueue time.
    pub priority: i32,
}

/// Backend that records enqueues and serves hand-staged results.
///
/// # Examples
///
/// ```
/// use hook_tasks::testing::MockBackend;
/// use hook_tasks::{Backend, Task, TaskArgs};
/// use serde_json::json;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let mock = MockBackend::new();
/// let search = Task::from_fn("search", |_| Ok(json!("unused")));
///
/// mock.enqueue(&search, TaskArgs::from([json!("q")]), "s1", "hits").await.unwrap();
/// assert_eq!(mock.enqueued()[0].task_name, "search");
/// assert!(!mock.has("s1", Some("hits")).await);
///
/// mock.set_result("s1", "hits", json!(["a", "b"]));
/// assert_eq!(mock.pop("s1", "hits").await, Some(json!(["a", "b"])));
/// # });
/// ```
#[derive(Debug, Default)]
pub struct MockBackend {
    store: SessionStore,
    enqueued: Mutex<Vec<EnqueueRecord>>,
    shut_down: AtomicBool,
}

impl MockBackend {
    /// Creates an empty mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every enqueue seen so far, in call order.
    pub fn enqueued(&self) -> Vec<EnqueueRecord> {
        self.enqueued.lock().clone()
    }

    /// Number of enqueues seen so far.
    pub fn enqueue_count(&self) -> usize {
        self.enqueued.lock().len()
    }

    /// Returns `true` once `shutdown` has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stages a `Completed` result holding `value`.
    pub fn set_result(&self, session_id: &str, key: &str, value: Value) {
        self.stage(session_id, key, |result| {
            result.set_running()?;
            result.set_completed(value)
        });
    }

    /// Stages a `Failed` result holding `failure`.
    pub fn set_failure(&self, session_id: &str, key: &str, failure: TaskFailure) {
        self.stage(session_id, key, |result| {
            result.set_running()?;
            result.set_failed(failure)
        });
    }

    /// Stages a `Pending` result, e.g. to exercise timeouts.
    pub fn set_pending(&self, session_id: &str, key: &str) {
        self.stage(session_id, key, |_| Ok(()));
    }

    fn stage<F>(&self, session_id: &str, key: &str, drive: F)
    where
        F: FnOnce(&mut TaskResult) -> Result<(), TaskError>,
    {
        let mut result = TaskResult::new(session_id, key).with_task_name("staged");
        if let Err(err) = drive(&mut result) {
            tracing::error!(session_id, key, error = %err, "failed to stage result");
            return;
        }
        self.store
            .insert(ResultCell::new(result, CancellationToken::new()));
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn enqueue(
        &self,
        task: &Task,
        args: TaskArgs,
        session_id: &str,
        key: &str,
    ) -> Result<TaskHandle, TaskError> {
        if self.is_shut_down() {
            return Err(TaskError::ShutDown);
        }
        self.enqueued.lock().push(EnqueueRecord {
            task_name: task.name().to_string(),
            args,
            session_id: session_id.to_string(),
            key: key.to_string(),
            priority: task.priority(),
        });
        let cell: Arc<ResultCell> = new_cell(task, session_id, key, CancellationToken::new());
        self.store.insert(Arc::clone(&cell));
        Ok(TaskHandle::new(cell))
    }

    async fn get(&self, session_id: &str, key: &str) -> Option<TaskResult> {
        self.store.get(session_id, key)
    }

    async fn pop(&self, session_id: &str, key: &str) -> Option<Value> {
        self.store.pop(session_id, key)
    }

    async fn pop_all(&self, session_id: &str) -> Vec<Value> {
        self.store.pop_all(session_id)
    }

    async fn pop_errors(&self, session_id: &str) -> Vec<(String, TaskFailure)> {
        self.store.pop_errors(session_id)
    }

    async fn has(&self, session_id: &str, key: Option<&str>) -> bool {
        self.store.has(session_id, key)
    }

    async fn cancel(&self, session_id: &str, key: &str) -> bool {
        self.store.cancel(session_id, key)
    }

    async fn wait(
        &self,
        session_id: &str,
        key: &str,
        timeout: Duration,
    ) -> Result<Value, TaskError> {
        self.store.wait(session_id, key, timeout).await
    }

    async fn wait_all(
        &self,
        session_id: &str,
        keys: &[&str],
        timeout: Duration,
    ) -> Result<HashMap<String, Value>, TaskError> {
        self.store.wait_all(session_id, keys, timeout).await
    }

    async fn wait_any(
        &self,
        session_id: &str,
        keys: &[&str],
        timeout: Duration,
    ) -> Result<(String, Value), TaskError> {
        self.store.wait_any(session_id, keys, timeout).await
    }

    async fn shutdown(&self, _wait: bool) -> Result<(), TaskError> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Err(TaskError::AlreadyShutDown);
        }
        self.store.clear();
        Ok(())
    }
}
