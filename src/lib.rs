//! cadence: scheduled SQL pipelines with durable job tracking.
//!
//! Each pipeline is a named transformation statement plus an optional cron
//! schedule. When a pipeline fires, the run processes the previous whole UTC
//! day(s), opens a `RUNNING` job record, executes the statement with `:from`
//! and `:to` bound, and closes the job as `SUCCEEDED` or `FAILED`.
//!
//! ```no_run
//! use cadence::{DryRunBackend, InMemoryJobRepository, Scheduler, load_pipelines};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = load_pipelines("pipelines")?;
//! let mut scheduler = Scheduler::new(
//!     Arc::new(InMemoryJobRepository::new()),
//!     Arc::new(DryRunBackend::new()),
//! );
//! scheduler.register_all(&registry)?;
//! let (handle, _task) = scheduler.start().await;
//! let report = handle.run_now("daily_stats").await?;
//! println!("{:?}", report.outcome);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod backend;
pub mod config;
pub mod coordinator;
pub mod core;
pub mod events;
pub mod repository;
pub mod scheduler;
pub mod testing;

pub use backend::{DryRunBackend, ExecutionBackend, ExecutionError, ExecutionStats, MySqlBackend};
pub use config::{ConfigError, Settings, load_pipelines};
pub use coordinator::{RunCoordinator, RunError, RunOutcome, RunReport, SUCCESS_MESSAGE};
pub use crate::core::clock::{Clock, SystemClock};
pub use crate::core::pipeline::{PipelineDefinition, PipelineRegistry, RegistryError};
pub use crate::core::schedule::{
    CronParser, CronSchedule, ScheduleError, ScheduleParser, TriggerSchedule,
};
pub use crate::core::types::{JobId, PipelineName};
pub use crate::core::window::{TimeWindow, WindowError, WindowParams, WindowPolicy, window};
pub use events::{Event, EventBus, EventHandler};
pub use repository::{
    InMemoryJobRepository, JobCompletion, JobRepository, JobStatus, PipelineJob, RepositoryError,
    SqliteJobRepository,
};
pub use scheduler::{RunTicket, Scheduler, SchedulerError, SchedulerHandle, SchedulerState};
