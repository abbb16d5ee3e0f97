//! Result lifecycle status and its state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TaskError;

/// Lifecycle status of a [`TaskResult`](crate::domain::TaskResult).
///
/// # State Machine
///
/// ```text
/// Pending -> Running, Failed, Cancelled
/// Running -> Completed, Failed, Cancelled
/// Completed -> (terminal, no transitions)
/// Failed -> (terminal, no transitions)
/// Cancelled -> (terminal, no transitions)
/// ```
///
/// `Pending -> Failed` covers a callable that failed before a running
/// transition was recorded. Self-transitions are rejected.
///
/// # Examples
///
/// ```
/// use hook_tasks::TaskStatus;
///
/// let status = TaskStatus::Pending;
/// assert!(!status.is_terminal());
/// assert!(status.can_transition_to(&TaskStatus::Running));
/// assert!(!status.can_transition_to(&TaskStatus::Completed));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Accepted by a backend, not started yet.
    Pending,
    /// Picked up by a worker and executing.
    Running,
    /// Finished with a value (terminal).
    Completed,
    /// Finished with an error (terminal).
    Failed,
    /// Cancelled before producing a value (terminal).
    Cancelled,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl TaskStatus {
    /// Returns `true` for `Completed`, `Failed`, and `Cancelled`.
    ///
    /// # Examples
    ///
    /// ```
    /// use hook_tasks::TaskStatus;
    ///
    /// assert!(!TaskStatus::Pending.is_terminal());
    /// assert!(!TaskStatus::Running.is_terminal());
    /// assert!(TaskStatus::Completed.is_terminal());
    /// assert!(TaskStatus::Failed.is_terminal());
    /// assert!(TaskStatus::Cancelled.is_terminal());
    /// ```
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns `true` if moving from this status to `next` is allowed.
    pub fn can_transition_to(&self, next: &Self) -> bool {
        if self == next {
            return false;
        }

        match self {
            Self::Pending => matches!(next, Self::Running | Self::Failed | Self::Cancelled),
            Self::Running => matches!(next, Self::Completed | Self::Failed | Self::Cancelled),
            Self::Completed | Self::Failed | Self::Cancelled => false,
        }
    }

    /// Validates a transition from this status to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidTransition`] naming `task_id` when the
    /// transition is not allowed.
    ///
    /// # Examples
    ///
    /// ```
    /// use hook_tasks::TaskStatus;
    ///
    /// assert!(TaskStatus::Running
    ///     .validate_transition("r1", &TaskStatus::Completed)
    ///     .is_ok());
    /// assert!(TaskStatus::Completed
    ///     .validate_transition("r1", &TaskStatus::Running)
    ///     .is_err());
    /// ```
    pub fn validate_transition(&self, task_id: &str, next: &Self) -> Result<(), TaskError> {
        if self.can_transition_to(next) {
            return Ok(());
        }

        let suggested_action = if self.is_terminal() {
            Some("result is in a terminal state and cannot be transitioned".to_string())
        } else if self == next {
            Some(format!("result is already {self}"))
        } else {
            None
        };

        Err(TaskError::InvalidTransition {
            task_id: task_id.to_string(),
            from: *self,
            to: *next,
            suggested_action,
        })
    }
}
