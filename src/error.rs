//! Error types for background task operations.
//!
//! Two types live here:
//!
//! - [`TaskFailure`] is the error a task callable produced. It is stored on
//!   the [`TaskResult`](crate::domain::TaskResult) and handed back to later
//!   callers through `pop_errors` or the `wait*` family.
//! - [`TaskError`] is what backend and facade operations return: task
//!   failures re-raised at a `wait*` boundary, timeouts, and misuse.
//!
//! Absence (a key that was never enqueued, already popped, or expired) is not
//! an error anywhere in this crate; it is an `Option::None`.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::types::status::TaskStatus;

/// The error produced by a task callable, captured for later retrieval.
///
/// Cloning is cheap: the original [`anyhow::Error`] sits behind an `Arc`, so
/// every clone refers to the same error object. Use
/// [`downcast_ref`](Self::downcast_ref) to recover the concrete error type
/// the callable returned.
///
/// # Examples
///
/// ```
/// use hook_tasks::TaskFailure;
///
/// #[derive(Debug)]
/// struct Boom;
/// impl std::fmt::Display for Boom {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         write!(f, "boom")
///     }
/// }
/// impl std::error::Error for Boom {}
///
/// let failure = TaskFailure::new(Boom);
/// assert_eq!(failure.to_string(), "boom");
/// assert!(failure.downcast_ref::<Boom>().is_some());
///
/// let copy = failure.clone();
/// assert!(copy.ptr_eq(&failure));
/// ```
#[derive(Clone)]
pub struct TaskFailure {
    inner: Arc<anyhow::Error>,
}

impl TaskFailure {
    /// Wraps an error returned by a task callable.
    pub fn new(error: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: Arc::new(error.into()),
        }
    }

    /// Builds a failure from a plain message.
    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self::new(anyhow::Error::msg(message))
    }

    /// Converts a caught panic payload into a failure.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let detail = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::msg(format!("task panicked: {detail}"))
    }

    /// Returns the underlying error if it is of type `E`.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.inner.downcast_ref::<E>()
    }

    /// Returns the wrapped [`anyhow::Error`].
    pub fn as_anyhow(&self) -> &anyhow::Error {
        &self.inner
    }

    /// Returns `true` if both failures refer to the same error object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            write!(f, "{:#}", self.inner)
        } else {
            write!(f, "{}", self.inner)
        }
    }
}

impl fmt::Debug for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaskFailure")
            .field(&format_args!("{:#}", self.inner))
            .finish()
    }
}

impl std::error::Error for TaskFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let err: &(dyn std::error::Error + 'static) = (*self.inner).as_ref();
        err.source()
    }
}

/// Errors returned by backend and facade operations.
///
/// Variants fall into three groups:
///
/// - **task failure**: [`Failed`](Self::Failed) and
///   [`Cancelled`](Self::Cancelled), only ever returned by `wait*`;
/// - **timeout**: [`Timeout`](Self::Timeout);
/// - **misuse**: [`InvalidTransition`](Self::InvalidTransition),
///   [`AlreadyShutDown`](Self::AlreadyShutDown),
///   [`EmptyKeys`](Self::EmptyKeys), plus [`ShutDown`](Self::ShutDown) for
///   work submitted after shutdown.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use hook_tasks::TaskError;
///
/// let err = TaskError::Timeout {
///     session_id: "s1".to_string(),
///     keys: vec!["memory".to_string()],
///     timeout: Duration::from_millis(250),
/// };
/// assert!(err.is_timeout());
/// assert!(!err.is_task_failure());
/// assert!(err.to_string().contains("memory"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// Attempted an invalid state machine transition.
    #[error("invalid transition from {from} to {to} for task {task_id}")]
    InvalidTransition {
        /// The result that was being transitioned.
        task_id: String,
        /// Its current status.
        from: TaskStatus,
        /// The rejected target status.
        to: TaskStatus,
        /// Optional hint for the caller.
        suggested_action: Option<String>,
    },

    /// The task behind `key` failed; `failure` is the error it produced.
    #[error("task {key} failed: {failure}")]
    Failed {
        /// Key the task was enqueued under.
        key: String,
        /// The stored failure.
        #[source]
        failure: TaskFailure,
    },

    /// The task behind `key` was cancelled before it produced a value.
    #[error("task {key} was cancelled")]
    Cancelled {
        /// Key the task was enqueued under.
        key: String,
    },

    /// A `wait*` deadline elapsed before the awaited result was ready.
    #[error("timed out after {timeout:?} waiting for {keys:?} in session {session_id}")]
    Timeout {
        /// Session that was waited on.
        session_id: String,
        /// Keys that were waited on.
        keys: Vec<String>,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// Work was submitted to a backend that has been shut down.
    #[error("backend is shut down and no longer accepts tasks")]
    ShutDown,

    /// `shutdown` was called on a backend that was already shut down.
    #[error("backend was already shut down")]
    AlreadyShutDown,

    /// `wait_any` was called without any key.
    #[error("wait_any requires at least one key")]
    EmptyKeys,
}

impl TaskError {
    /// Returns `true` for [`TaskError::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if the awaited task itself failed or was cancelled.
    pub fn is_task_failure(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::Cancelled { .. })
    }

    /// Returns `true` for programming errors: invalid transitions, double
    /// shutdown, and `wait_any` without keys.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. } | Self::AlreadyShutDown | Self::EmptyKeys
        )
    }

    /// Returns the stored task failure, if this error carries one.
    pub fn failure(&self) -> Option<&TaskFailure> {
        match self {
            Self::Failed { failure, .. } => Some(failure),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct LookupError(&'static str);

    impl fmt::Display for LookupError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "lookup failed: {}", self.0)
        }
    }

    impl std::error::Error for LookupError {}

    #[test]
    fn error_display_messages() {
        let err = TaskError::Cancelled {
            key: "memory".to_string(),
        };
        assert_eq!(err.to_string(), "task memory was cancelled");

        let err = TaskError::Failed {
            key: "lookup".to_string(),
            failure: TaskFailure::new(LookupError("db down")),
        };
        assert_eq!(err.to_string(), "task lookup failed: lookup failed: db down");

        let err = TaskError::InvalidTransition {
            task_id: "r1".to_string(),
            from: TaskStatus::Completed,
            to: TaskStatus::Running,
            suggested_action: None,
        };
        assert_eq!(
            err.to_string(),
            "invalid transition from completed to running for task r1"
        );
    }

    #[test]
    fn error_classification() {
        assert!(TaskError::AlreadyShutDown.is_misuse());
        assert!(TaskError::EmptyKeys.is_misuse());
        assert!(!TaskError::ShutDown.is_misuse());
        assert!(TaskError::Cancelled {
            key: "k".to_string()
        }
        .is_task_failure());

        let failure = TaskFailure::msg("nope");
        let err = TaskError::Failed {
            key: "k".to_string(),
            failure: failure.clone(),
        };
        assert!(err.is_task_failure());
        assert!(err.failure().unwrap().ptr_eq(&failure));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn failure_keeps_original_error() {
        let failure = TaskFailure::new(LookupError("missing index"));
        let inner = failure.downcast_ref::<LookupError>().unwrap();
        assert_eq!(inner.0, "missing index");
        assert!(failure.downcast_ref::<std::io::Error>().is_none());
    }

    #[test]
    fn failure_from_panic_payloads() {
        let failure = TaskFailure::from_panic(Box::new("static str"));
        assert_eq!(failure.to_string(), "task panicked: static str");

        let failure = TaskFailure::from_panic(Box::new(String::from("owned")));
        assert_eq!(failure.to_string(), "task panicked: owned");

        let failure = TaskFailure::from_panic(Box::new(42_u8));
        assert_eq!(failure.to_string(), "task panicked: non-string panic payload");
    }

    #[test]
    fn failure_alternate_display_shows_context_chain() {
        let failure = TaskFailure::new(
            anyhow::Error::new(LookupError("db down")).context("memory lookup"),
        );
        assert_eq!(failure.to_string(), "memory lookup");
        assert_eq!(
            format!("{failure:#}"),
            "memory lookup: lookup failed: db down"
        );
    }
}
