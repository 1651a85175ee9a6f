//! Scheduler for pipeline runs.
//!
//! This module provides the main scheduling loop that fires pipelines at
//! their scheduled times, the handle used to control it, and the per-pipeline
//! in-flight guard that prevents overlapping runs.

mod engine;
mod guard;
mod handle;
mod types;

pub use engine::Scheduler;
pub use guard::{InFlightGuard, InFlightRuns};
pub use handle::{RunTicket, SchedulerHandle};
pub use types::{ScheduledTrigger, SchedulerError, SchedulerState};
