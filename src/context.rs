//! Per-invocation facades handed to hook handlers.
//!
//! [`BackgroundTasks`] submits work and [`PendingResults`] retrieves what
//! earlier invocations submitted. Both are bound to one session id and share
//! one backend, so handler code never passes session ids around and can
//! never reach into another session's results.
//!
//! Both are `Clone + Send + Sync`: they hold an `Arc<dyn Backend>` and the
//! session id, and cloning produces a view of the same session.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use hook_tasks::{Backend, BackgroundTasks, ImmediateBackend, PendingResults, Task, TaskArgs};
//! use serde_json::json;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let backend: Arc<dyn Backend> = Arc::new(ImmediateBackend::new());
//! let lookup = Task::from_fn("lookup", |args| Ok(json!(format!("notes for {}", args.get::<String>(0)?))));
//!
//! // Invocation N starts the work.
//! let tasks = BackgroundTasks::new(Arc::clone(&backend), "session-1");
//! tasks.add(&lookup, TaskArgs::from([json!("main.rs")]), "notes").await.unwrap();
//!
//! // Invocation N+1 picks it up.
//! let pending = PendingResults::new(backend, "session-1");
//! let notes = pending.wait("notes", Duration::from_secs(1)).await.unwrap();
//! assert_eq!(notes, json!("notes for main.rs"));
//! # });
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::backend::Backend;
use crate::domain::TaskResult;
use crate::error::{TaskError, TaskFailure};
use crate::task::Task;
use crate::types::args::TaskArgs;

/// Submits background work for one session.
#[derive(Clone)]
pub struct BackgroundTasks {
    backend: Arc<dyn Backend>,
    session_id: String,
}

impl fmt::Debug for BackgroundTasks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundTasks")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl BackgroundTasks {
    /// Binds a view to `session_id` on `backend`.
    pub fn new(backend: Arc<dyn Backend>, session_id: impl Into<String>) -> Self {
        Self {
            backend,
            session_id: session_id.into(),
        }
    }

    /// Session this view submits to.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Enqueues `task` under `key`, replacing whatever the session held
    /// there.
    ///
    /// The task's outcome is not reported here; retrieve it later through
    /// [`PendingResults`].
    ///
    /// # Errors
    ///
    /// - [`TaskError::ShutDown`] if the backend has been shut down.
    pub async fn add(&self, task: &Task, args: TaskArgs, key: &str) -> Result<(), TaskError> {
        self.backend
            .enqueue(task, args, &self.session_id, key)
            .await
            .map(drop)
    }

    /// Requests cancellation of the work under `key`.
    ///
    /// Returns `false` if nothing is pending or running there.
    pub async fn cancel(&self, key: &str) -> bool {
        self.backend.cancel(&self.session_id, key).await
    }
}

/// Retrieves results for one session.
///
/// Every method forwards to the matching [`Backend`] operation with the
/// session id filled in; see there for the exact semantics.
#[derive(Clone)]
pub struct PendingResults {
    backend: Arc<dyn Backend>,
    session_id: String,
}

impl fmt::Debug for PendingResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResults")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl PendingResults {
    /// Binds a view to `session_id` on `backend`.
    pub fn new(backend: Arc<dyn Backend>, session_id: impl Into<String>) -> Self {
        Self {
            backend,
            session_id: session_id.into(),
        }
    }

    /// Session this view reads from.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Snapshot of the result under `key` without consuming it.
    pub async fn get(&self, key: &str) -> Option<TaskResult> {
        self.backend.get(&self.session_id, key).await
    }

    /// Takes the value under `key` if the task completed.
    pub async fn pop(&self, key: &str) -> Option<Value> {
        self.backend.pop(&self.session_id, key).await
    }

    /// Takes every completed value.
    pub async fn pop_all(&self) -> Vec<Value> {
        self.backend.pop_all(&self.session_id).await
    }

    /// Takes every failure as `(key, error)`.
    pub async fn pop_errors(&self) -> Vec<(String, TaskFailure)> {
        self.backend.pop_errors(&self.session_id).await
    }

    /// Returns `true` if `key` (or any key, when `None`) has a completed
    /// value waiting.
    pub async fn has(&self, key: Option<&str>) -> bool {
        self.backend.has(&self.session_id, key).await
    }

    /// Waits for `key` and takes its value.
    ///
    /// # Errors
    ///
    /// See [`Backend::wait`].
    pub async fn wait(&self, key: &str, timeout: Duration) -> Result<Value, TaskError> {
        self.backend.wait(&self.session_id, key, timeout).await
    }

    /// Waits for every key and takes all values at once.
    ///
    /// # Errors
    ///
    /// See [`Backend::wait_all`].
    pub async fn wait_all(
        &self,
        keys: &[&str],
        timeout: Duration,
    ) -> Result<HashMap<String, Value>, TaskError> {
        self.backend.wait_all(&self.session_id, keys, timeout).await
    }

    /// Waits for the first key to complete and takes its value.
    ///
    /// # Errors
    ///
    /// See [`Backend::wait_any`].
    pub async fn wait_any(
        &self,
        keys: &[&str],
        timeout: Duration,
    ) -> Result<(String, Value), TaskError> {
        self.backend.wait_any(&self.session_id, keys, timeout).await
    }
}
