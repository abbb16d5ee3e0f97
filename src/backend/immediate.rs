//! Backend that runs every task inside `enqueue`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{new_cell, run_job, Backend};
use crate::domain::TaskResult;
use crate::error::{TaskError, TaskFailure};
use crate::store::{SessionStore, TaskHandle};
use crate::task::Task;
use crate::types::args::TaskArgs;

/// Synchronous backend: `enqueue` drives the task to `Completed` or
/// `Failed` before returning.
///
/// Useful for tests, for debugging handlers, and for hooks whose work is
/// cheap enough to finish within the invocation. Because nothing is ever
/// left running, [`cancel`](Backend::cancel) returns `false` for every
/// enqueued key and the `wait*` family resolves without suspending for keys
/// that were already enqueued.
///
/// # Examples
///
/// ```
/// use hook_tasks::{Backend, ImmediateBackend, Task, TaskArgs};
/// use serde_json::json;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let backend = ImmediateBackend::new();
/// let double = Task::from_fn("double", |args| Ok(json!(args.get::<i64>(0)? * 2)));
///
/// backend.enqueue(&double, TaskArgs::from([json!(5)]), "s1", "d").await.unwrap();
/// assert!(backend.has("s1", Some("d")).await);
/// assert_eq!(backend.pop("s1", "d").await, Some(json!(10)));
/// assert_eq!(backend.pop("s1", "d").await, None);
/// # });
/// ```
#[derive(Debug, Default)]
pub struct ImmediateBackend {
    store: SessionStore,
    shut_down: AtomicBool,
}

impl ImmediateBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Backend for ImmediateBackend {
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

        // The entry only becomes visible once the job is terminal, so no
        // caller can observe it running or cancel it mid-flight.
        let cell = new_cell(task, session_id, key, CancellationToken::new());
        run_job(&self.store, Arc::clone(&cell), task.clone(), args).await;

        self.store.insert(Arc::clone(&cell));
        // A shutdown that cleared the store before the insert above must
        // not leave this entry behind.
        if self.shut_down.load(Ordering::SeqCst) {
            self.store.remove(session_id, key, &cell);
            tracing::debug!(session_id, key, "backend shut down while task ran; result dropped");
        } else {
            tracing::debug!(session_id, key, task = task.name(), "task finished inline");
        }
        Ok(TaskHandle::new(cell))
    }

    async fn get(&self, session_id: &str, key: &str) -> Option<TaskResult> {
        self.store.get(session_id, key)
    }

    async fn pop(&self, session_id: &str, key: &str) -> Option<Value> {
        let value = self.store.pop(session_id, key);
        tracing::debug!(session_id, key, found = value.is_some(), "pop");
        value
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
        if self.shut_down.swap(true, Ordering::SeqCst) {
            tracing::error!("shutdown called twice");
            return Err(TaskError::AlreadyShutDown);
        }
        let cleared = self.store.clear();
        tracing::debug!(cleared = cleared.len(), "immediate backend shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::status::TaskStatus;
    use serde_json::json;

    #[tokio::test]
    async fn enqueue_finishes_before_returning() {
        let backend = ImmediateBackend::new();
        let task = Task::from_fn("one", |_| Ok(json!(1)));
        let handle = backend.enqueue(&task, TaskArgs::new(), "s", "k").await.unwrap();
        assert_eq!(handle.status(), TaskStatus::Completed);
        assert!(!backend.cancel("s", "k").await);
    }

    #[tokio::test]
    async fn shutdown_clears_and_rejects() {
        let backend = ImmediateBackend::new();
        let task = Task::from_fn("one", |_| Ok(json!(1)));
        backend.enqueue(&task, TaskArgs::new(), "s", "k").await.unwrap();

        backend.shutdown(true).await.unwrap();
        assert!(backend.get("s", "k").await.is_none());
        assert!(matches!(
            backend.enqueue(&task, TaskArgs::new(), "s", "k").await,
            Err(TaskError::ShutDown)
        ));
        assert!(matches!(
            backend.shutdown(false).await,
            Err(TaskError::AlreadyShutDown)
        ));
    }
}
