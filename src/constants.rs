//! Default values shared by tasks, backends, and the runtime.

use std::time::Duration;

/// Default time a finished result stays retrievable (five minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Default scheduling priority. Higher values are picked up first by
/// backends that honor priority.
pub const DEFAULT_PRIORITY: i32 = 0;

/// Default number of workers in a [`WorkerPoolBackend`](crate::backend::WorkerPoolBackend).
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Session id used when a hook event carries none.
pub const DEFAULT_SESSION_ID: &str = "default";

/// Event field the dispatcher reads the session id from.
pub const SESSION_ID_FIELD: &str = "session_id";
