//! Subscriber setup for binaries embedding the task runtime.
//!
//! Hook processes answer on stdout, so log output goes to stderr.

use tracing_subscriber::EnvFilter;

/// Installs a global fmt subscriber filtered by `RUST_LOG`, or by
/// `default_filter` when `RUST_LOG` is unset or invalid.
///
/// Returns `false` if a global subscriber was already installed.
///
/// # Examples
///
/// ```
/// hook_tasks::logging::init_logging("hook_tasks=debug");
/// tracing::debug!("visible on stderr");
/// ```
pub fn init_logging(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .is_ok()
}
