//! Task result record -- one execution's lifecycle and payload.
//!
//! [`TaskResult`] is created `Pending` when a backend accepts work and is
//! driven through the [`TaskStatus`] state machine by the backend that owns
//! it. The invariants it maintains:
//!
//! - `value` is set only in `Completed`, `error` only in `Failed`;
//! - `created_at <= started_at <= finished_at` whenever they are set;
//! - once `finished_at` is set, every further transition is rejected.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::constants::DEFAULT_TTL;
use crate::error::{TaskError, TaskFailure};
use crate::types::status::TaskStatus;

/// Record of one task execution, keyed by `(session_id, key)`.
///
/// Backends own the live record; callers only ever see snapshots (via
/// `get` or [`TaskHandle::snapshot`](crate::backend::TaskHandle::snapshot)).
///
/// # Examples
///
/// ```
/// use hook_tasks::{TaskResult, TaskStatus};
/// use serde_json::json;
///
/// let mut result = TaskResult::new("session-1", "memory");
/// assert_eq!(result.status(), TaskStatus::Pending);
///
/// result.set_running().unwrap();
/// result.set_completed(json!("done")).unwrap();
///
/// assert!(result.is_finished());
/// assert_eq!(result.value(), Some(&json!("done")));
/// assert!(result.set_running().is_err());
/// ```
#[derive(Debug, Clone)]
pub struct TaskResult {
    id: String,
    session_id: String,
    key: String,
    task_name: String,
    status: TaskStatus,
    value: Option<Value>,
    error: Option<TaskFailure>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    ttl: Duration,
}

impl TaskResult {
    /// Creates a `Pending` result with a fresh `UUIDv4` id, the current
    /// time as `created_at`, and the default TTL.
    pub fn new(session_id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            key: key.into(),
            task_name: String::new(),
            status: TaskStatus::Pending,
            value: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            ttl: DEFAULT_TTL,
        }
    }

    /// Sets the TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the name of the task that produced this result.
    pub fn with_task_name(mut self, name: impl Into<String>) -> Self {
        self.task_name = name.into();
        self
    }

    /// Overrides `created_at`, e.g. when restoring a record or simulating
    /// an old one in tests.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Unique id of this enqueue.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Session the result belongs to.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Key of the result within its session.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Name of the task that produced this result (empty if unknown).
    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    /// Current status.
    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// The value, present only when `Completed`.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// The failure, present only when `Failed`.
    pub fn error(&self) -> Option<&TaskFailure> {
        self.error.as_ref()
    }

    /// When the result was created (enqueue time).
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// When execution started.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// When the result reached a terminal state.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// How long the result stays retrievable after `created_at`.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns `true` once the status is terminal.
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns `true` if more than `ttl` has elapsed since `created_at`.
    ///
    /// Checked on every access; nothing evicts results in the background.
    pub fn is_expired(&self) -> bool {
        match Utc::now().signed_duration_since(self.created_at).to_std() {
            Ok(elapsed) => elapsed > self.ttl,
            // created_at is in the future (clock skew): not expired.
            Err(_) => false,
        }
    }

    /// Marks the result `Running` and records `started_at`.
    ///
    /// # Errors
    ///
    /// [`TaskError::InvalidTransition`] unless the result is `Pending`.
    pub fn set_running(&mut self) -> Result<(), TaskError> {
        self.transition(TaskStatus::Running)?;
        self.started_at = Some(Self::now_not_before(self.created_at));
        Ok(())
    }

    /// Marks the result `Completed` with `value` and records `finished_at`.
    ///
    /// # Errors
    ///
    /// [`TaskError::InvalidTransition`] unless the result is `Running`.
    pub fn set_completed(&mut self, value: Value) -> Result<(), TaskError> {
        self.transition(TaskStatus::Completed)?;
        self.value = Some(value);
        self.mark_finished();
        Ok(())
    }

    /// Marks the result `Failed` with `error` and records `finished_at`.
    ///
    /// # Errors
    ///
    /// [`TaskError::InvalidTransition`] unless the result is `Pending` or
    /// `Running`.
    pub fn set_failed(&mut self, error: TaskFailure) -> Result<(), TaskError> {
        self.transition(TaskStatus::Failed)?;
        self.error = Some(error);
        self.mark_finished();
        Ok(())
    }

    /// Marks the result `Cancelled` and records `finished_at`.
    ///
    /// # Errors
    ///
    /// [`TaskError::InvalidTransition`] unless the result is `Pending` or
    /// `Running`.
    pub fn set_cancelled(&mut self) -> Result<(), TaskError> {
        self.transition(TaskStatus::Cancelled)?;
        self.mark_finished();
        Ok(())
    }

    fn transition(&mut self, next: TaskStatus) -> Result<(), TaskError> {
        self.status.validate_transition(&self.id, &next)?;
        self.status = next;
        Ok(())
    }

    fn mark_finished(&mut self) {
        let floor = self.started_at.unwrap_or(self.created_at);
        self.finished_at = Some(Self::now_not_before(floor));
    }

    // Wall-clock time can step backwards; clamp so timestamps never decrease.
    fn now_not_before(floor: DateTime<Utc>) -> DateTime<Utc> {
        Utc::now().max(floor)
    }
}
