//! Value types shared across the crate.
//!
//! - [`status`] - Result lifecycle status and state machine validation
//! - [`args`] - Arguments passed to task callables

pub mod args;
pub mod status;

pub use args::TaskArgs;
pub use status::TaskStatus;
