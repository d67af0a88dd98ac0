//! Scheduler runner -- owns the registry and drives trigger execution.
//!
//! Split into focused submodules:
//! - `core`: ExperimentScheduler struct, constructor, and the public API
//!   (schedule/unschedule/update, pause/resume, start/stop, status)
//! - `execution`: the dispatcher loop and per-trigger execution path

mod core;
mod execution;

pub use self::core::{ExperimentScheduler, SchedulerStatus};
