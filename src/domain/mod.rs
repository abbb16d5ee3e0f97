//! Domain types for tracking task executions.
//!
//! - [`record`] - The [`TaskResult`] record and its transitions

pub mod record;

pub use record::TaskResult;
