//! Background tasks and a cross-invocation result cache for hook processes.
//!
//! A hook handler runs inside a short-lived invocation. Work it starts often
//! cannot finish before the handler has to answer, so this crate lets the
//! handler enqueue that work and lets a *later* invocation for the same
//! session pick up the result.
//!
//! # Overview
//!
//! - A [`Task`] pairs a callable with [`TaskOptions`] (priority, TTL,
//!   transform).
//! - A [`Backend`] executes tasks and stores one [`TaskResult`] per
//!   `(session_id, key)`. [`ImmediateBackend`] runs work inline and
//!   [`WorkerPoolBackend`] runs it on a bounded pool of tokio workers.
//! - [`BackgroundTasks`] and [`PendingResults`] are the per-invocation
//!   facades a handler sees, bound to its session.
//! - [`TaskRuntime`] owns the shared backend and builds an [`Invocation`]
//!   for each hook event.
//!
//! Results follow the [`TaskStatus`] state machine
//! (`pending -> running -> completed | failed`, with `cancelled` reachable
//! from both non-terminal states) and expire lazily after their TTL.
//!
//! # Module Organization
//!
//! - [`task`] - Task descriptors and options
//! - [`types`] - Task arguments and the status state machine
//! - [`domain`] - The [`TaskResult`] record
//! - [`backend`] - The [`Backend`] trait, both implementations and
//!   [`BackendConfig`]
//! - [`context`] - Per-invocation facades
//! - [`runtime`] - Dispatcher wiring and session resolution
//! - [`error`] - [`TaskError`] and [`TaskFailure`]
//! - [`constants`] - Defaults
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use hook_tasks::{BackendConfig, Task, TaskArgs, TaskRuntime};
//! use serde_json::json;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let runtime = TaskRuntime::from_config(&BackendConfig::default().with_max_workers(2));
//! let summarize = Task::new("summarize", |args: TaskArgs| async move {
//!     let path: String = args.get(0)?;
//!     tokio::time::sleep(Duration::from_millis(20)).await;
//!     anyhow::Ok(json!(format!("summary of {path}")))
//! });
//!
//! // PostToolUse: start the work and answer right away.
//! let event = json!({ "session_id": "s-42" });
//! let invocation = runtime.invocation_for_event(&event);
//! invocation
//!     .tasks
//!     .add(&summarize, TaskArgs::from([json!("src/lib.rs")]), "summary")
//!     .await
//!     .unwrap();
//!
//! // A later event in the same session collects it.
//! let later = runtime.invocation_for_event(&event);
//! let summary = later.pending.wait("summary", Duration::from_secs(2)).await.unwrap();
//! assert_eq!(summary, json!("summary of src/lib.rs"));
//!
//! runtime.shutdown(true).await.unwrap();
//! # });
//! ```

pub mod backend;
pub mod constants;
pub mod context;
pub mod domain;
pub mod error;
#[cfg(feature = "logging")]
pub mod logging;
pub mod runtime;
pub(crate) mod store;
pub mod task;
#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;
pub mod types;

// Re-exports for ergonomic access
pub use backend::{
    Backend, BackendConfig, BackendKind, ImmediateBackend, TaskHandle, WorkerPoolBackend,
};
pub use context::{BackgroundTasks, PendingResults};
pub use domain::TaskResult;
pub use error::{TaskError, TaskFailure};
pub use runtime::{resolve_session_id, Invocation, TaskRuntime};
pub use task::{Task, TaskFuture, TaskOptions};
pub use types::{TaskArgs, TaskStatus};
