//! Shared slot holding one live [`TaskResult`].
//!
//! A [`ResultCell`] is shared between the session map, the worker running
//! the job, and any [`TaskHandle`] given back to the caller. All reads and
//! transitions go through its mutex, so every observer sees whole records.
//! The lock is never held across an `.await`.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::domain::TaskResult;
use crate::types::status::TaskStatus;

#[derive(Debug)]
pub(crate) struct ResultCell {
    state: Mutex<TaskResult>,
    cancel: CancellationToken,
}

impl ResultCell {
    pub(crate) fn new(result: TaskResult, cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(result),
            cancel,
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, TaskResult> {
        self.state.lock()
    }

    pub(crate) fn snapshot(&self) -> TaskResult {
        self.state.lock().clone()
    }

    pub(crate) fn status(&self) -> TaskStatus {
        self.state.lock().status()
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Moves a non-terminal result to `Cancelled` and signals the job.
    /// Returns `false` if the result had already finished.
    pub(crate) fn try_cancel(&self) -> bool {
        {
            let mut result = self.state.lock();
            if result.is_finished() || result.set_cancelled().is_err() {
                return false;
            }
        }
        self.cancel.cancel();
        true
    }
}

/// Live view of a result returned by `enqueue`.
///
/// The handle keeps observing the record even after the backend has evicted
/// it or replaced it under the same key, so callers can always learn how the
/// job they submitted ended.
///
/// # Examples
///
/// ```
/// use hook_tasks::{Backend, ImmediateBackend, Task, TaskArgs, TaskStatus};
/// use serde_json::json;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let backend = ImmediateBackend::new();
/// let echo = Task::from_fn("echo", |args| args.get::<serde_json::Value>(0));
///
/// let handle = backend
///     .enqueue(&echo, TaskArgs::from([json!(1)]), "s1", "k")
///     .await
///     .unwrap();
/// assert_eq!(handle.status(), TaskStatus::Completed);
/// assert_eq!(handle.snapshot().value(), Some(&json!(1)));
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: String,
    session_id: String,
    key: String,
    cell: Arc<ResultCell>,
}

impl TaskHandle {
    pub(crate) fn new(cell: Arc<ResultCell>) -> Self {
        let (id, session_id, key) = {
            let result = cell.lock();
            (
                result.id().to_string(),
                result.session_id().to_string(),
                result.key().to_string(),
            )
        };
        Self {
            id,
            session_id,
            key,
            cell,
        }
    }

    /// Unique id of the enqueue this handle tracks.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Session the work was enqueued under.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Key the work was enqueued under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current status.
    pub fn status(&self) -> TaskStatus {
        self.cell.status()
    }

    /// Returns `true` once the job reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    /// Consistent copy of the record as it is right now.
    pub fn snapshot(&self) -> TaskResult {
        self.cell.snapshot()
    }
}
