//! Wiring between a hook dispatcher and the shared backend.
//!
//! A hook process builds one [`TaskRuntime`] at startup and asks it for an
//! [`Invocation`] per incoming event. The runtime is an ordinary value the
//! application owns and passes around; there is no process-global backend.
//!
//! # Session Resolution
//!
//! [`resolve_session_id`] reads the event's `session_id` field. Missing,
//! empty and non-string values all fall back to [`DEFAULT_SESSION_ID`], so
//! events from hosts that do not send a session still share one bucket
//! instead of failing.

use std::sync::Arc;

use serde_json::Value;

use crate::backend::{Backend, BackendConfig};
use crate::constants::{DEFAULT_SESSION_ID, SESSION_ID_FIELD};
use crate::context::{BackgroundTasks, PendingResults};
use crate::error::TaskError;

/// Session id carried by a hook event.
///
/// # Examples
///
/// ```
/// use hook_tasks::runtime::resolve_session_id;
/// use hook_tasks::constants::DEFAULT_SESSION_ID;
/// use serde_json::json;
///
/// assert_eq!(resolve_session_id(&json!({ "session_id": "abc" })), "abc");
/// assert_eq!(resolve_session_id(&json!({ "session_id": "" })), DEFAULT_SESSION_ID);
/// assert_eq!(resolve_session_id(&json!({ "session_id": 7 })), DEFAULT_SESSION_ID);
/// assert_eq!(resolve_session_id(&json!({})), DEFAULT_SESSION_ID);
/// ```
pub fn resolve_session_id(event: &Value) -> String {
    match event.get(SESSION_ID_FIELD).and_then(Value::as_str) {
        Some(session_id) if !session_id.is_empty() => session_id.to_string(),
        _ => DEFAULT_SESSION_ID.to_string(),
    }
}

/// The two facades a handler receives for one invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Submits work for this invocation's session.
    pub tasks: BackgroundTasks,
    /// Retrieves results for this invocation's session.
    pub pending: PendingResults,
}

/// Owner of the backend shared by every invocation of a process.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use hook_tasks::{BackendConfig, BackendKind, Task, TaskArgs, TaskRuntime};
/// use serde_json::json;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let runtime = TaskRuntime::from_config(
///     &BackendConfig::default().with_kind(BackendKind::Immediate),
/// );
/// let event = json!({ "session_id": "abc", "hook_event_name": "PreToolUse" });
///
/// let first = runtime.invocation_for_event(&event);
/// let ping = Task::from_fn("ping", |_| Ok(json!("pong")));
/// first.tasks.add(&ping, TaskArgs::new(), "ping").await.unwrap();
///
/// let second = runtime.invocation_for_event(&event);
/// assert_eq!(second.pending.pop("ping").await, Some(json!("pong")));
///
/// runtime.shutdown(true).await.unwrap();
/// # });
/// ```
#[derive(Clone)]
pub struct TaskRuntime {
    backend: Arc<dyn Backend>,
}

impl std::fmt::Debug for TaskRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRuntime").finish_non_exhaustive()
    }
}

impl TaskRuntime {
    /// Wraps an already built backend.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Builds the backend described by `config`.
    pub fn from_config(config: &BackendConfig) -> Self {
        tracing::debug!(kind = ?config.kind, max_workers = config.max_workers, "building task runtime");
        Self::new(config.build())
    }

    /// The shared backend.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Facades bound to `session_id`.
    pub fn invocation(&self, session_id: impl Into<String>) -> Invocation {
        let session_id = session_id.into();
        Invocation {
            tasks: BackgroundTasks::new(Arc::clone(&self.backend), session_id.clone()),
            pending: PendingResults::new(Arc::clone(&self.backend), session_id),
        }
    }

    /// Facades bound to the session the hook `event` belongs to.
    pub fn invocation_for_event(&self, event: &Value) -> Invocation {
        self.invocation(resolve_session_id(event))
    }

    /// Shuts the shared backend down.
    ///
    /// # Errors
    ///
    /// See [`Backend::shutdown`].
    pub async fn shutdown(&self, wait: bool) -> Result<(), TaskError> {
        self.backend.shutdown(wait).await
    }
}
