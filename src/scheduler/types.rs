//! Scheduler type definitions.
//!
//! This module contains error types, state enums, triggers and command types
//! for the scheduler.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

use super::handle::RunTicket;
use crate::core::schedule::{ScheduleError, TriggerSchedule};
use crate::core::types::PipelineName;

/// Errors that can occur in the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No pipeline with this name is registered.
    #[error("pipeline not found: {0}")]
    PipelineNotFound(PipelineName),

    /// The previous run of this pipeline has not finished.
    #[error("pipeline already running: {0}")]
    AlreadyRunning(PipelineName),

    /// A pipeline with this name is already registered.
    #[error("duplicate pipeline: {0}")]
    DuplicatePipeline(PipelineName),

    /// A pipeline's schedule expression does not parse.
    #[error("invalid schedule for pipeline '{pipeline}': {source}")]
    InvalidSchedule {
        pipeline: PipelineName,
        #[source]
        source: ScheduleError,
    },

    /// The run ended without a report: its job record could not be written,
    /// or the run task itself failed.
    #[error("run aborted: {0}")]
    RunAborted(String),

    /// Channel error.
    #[error("channel error: {0}")]
    ChannelError(String),
}

/// State of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    /// Scheduler is stopped.
    Stopped,
    /// Scheduler is running.
    Running,
    /// Scheduler is paused.
    Paused,
}

/// The recurring trigger owned by the scheduler for one scheduled pipeline.
#[derive(Debug, Clone)]
pub struct ScheduledTrigger {
    pipeline: PipelineName,
    schedule: Arc<dyn TriggerSchedule>,
    timezone: Tz,
}

impl ScheduledTrigger {
    pub(crate) fn new(pipeline: PipelineName, schedule: Arc<dyn TriggerSchedule>, timezone: Tz) -> Self {
        Self {
            pipeline,
            schedule,
            timezone,
        }
    }

    pub fn pipeline(&self) -> &PipelineName {
        &self.pipeline
    }

    pub fn expression(&self) -> &str {
        self.schedule.expression()
    }

    /// Timezone the expression is evaluated in.
    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Fires are dropped, never queued, while a run is in flight.
    pub fn prevent_overrun(&self) -> bool {
        true
    }

    /// First fire strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        self.schedule.next_after(after)
    }
}

/// Commands that can be sent to the scheduler.
pub(crate) enum SchedulerCommand {
    /// Run a pipeline now.
    Trigger {
        pipeline: PipelineName,
        response: oneshot::Sender<Result<RunTicket, SchedulerError>>,
    },
    /// Pause the scheduler.
    Pause { response: oneshot::Sender<()> },
    /// Resume the scheduler.
    Resume { response: oneshot::Sender<()> },
    /// Shutdown the scheduler.
    Shutdown { response: oneshot::Sender<()> },
}
