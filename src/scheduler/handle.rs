//! Scheduler handle for controlling the scheduler.
//!
//! This module provides the `SchedulerHandle` type that allows external control
//! of the scheduler through commands like trigger, pause, resume, and shutdown,
//! plus read-only introspection of the loaded pipelines.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc, oneshot};

use crate::coordinator::RunReport;
use crate::core::clock::Clock;
use crate::core::pipeline::PipelineRegistry;
use crate::core::types::PipelineName;

use super::guard::InFlightRuns;
use super::types::{ScheduledTrigger, SchedulerCommand, SchedulerError, SchedulerState};

/// Buffer size for the command channel between SchedulerHandle and Scheduler.
pub(crate) const COMMAND_CHANNEL_BUFFER: usize = 32;

/// A manual run that has been started.
///
/// Dropping the ticket does not cancel the run.
#[derive(Debug)]
pub struct RunTicket {
    pipeline: PipelineName,
    receiver: oneshot::Receiver<Result<RunReport, SchedulerError>>,
}

impl RunTicket {
    pub(crate) fn new(
        pipeline: PipelineName,
        receiver: oneshot::Receiver<Result<RunReport, SchedulerError>>,
    ) -> Self {
        Self { pipeline, receiver }
    }

    pub fn pipeline(&self) -> &PipelineName {
        &self.pipeline
    }

    /// Wait for the run to finish.
    pub async fn wait(self) -> Result<RunReport, SchedulerError> {
        self.receiver.await.map_err(|_| {
            SchedulerError::RunAborted(format!(
                "run of pipeline '{}' ended without a report",
                self.pipeline
            ))
        })?
    }
}

/// Handle for controlling the scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    pub(crate) command_tx: mpsc::Sender<SchedulerCommand>,
    pub(crate) state: Arc<RwLock<SchedulerState>>,
    pub(crate) registry: Arc<PipelineRegistry>,
    pub(crate) triggers: Arc<BTreeMap<PipelineName, ScheduledTrigger>>,
    pub(crate) in_flight: InFlightRuns,
    pub(crate) clock: Arc<dyn Clock>,
}

impl SchedulerHandle {
    /// Helper to send a command that returns a result and wait for response.
    async fn send_result_command<T>(
        &self,
        build_command: impl FnOnce(oneshot::Sender<Result<T, SchedulerError>>) -> SchedulerCommand,
        operation: &str,
    ) -> Result<T, SchedulerError>
    where
        T: Send + 'static,
    {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(build_command(response_tx))
            .await
            .map_err(|_| {
                SchedulerError::ChannelError(format!("failed to send {} command", operation))
            })?;

        response_rx.await.map_err(|_| {
            SchedulerError::ChannelError(format!("failed to receive {} response", operation))
        })?
    }

    /// Helper to send a command that returns unit and wait for response.
    async fn send_unit_command(
        &self,
        build_command: impl FnOnce(oneshot::Sender<()>) -> SchedulerCommand,
        operation: &str,
    ) -> Result<(), SchedulerError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(build_command(response_tx))
            .await
            .map_err(|_| {
                SchedulerError::ChannelError(format!("failed to send {} command", operation))
            })?;

        response_rx.await.map_err(|_| {
            SchedulerError::ChannelError(format!("failed to receive {} response", operation))
        })?;

        Ok(())
    }

    /// Start a run of `pipeline` now.
    ///
    /// Rejected with [`SchedulerError::AlreadyRunning`] while a previous run
    /// of the same pipeline is in flight; no job is created in that case.
    pub async fn trigger(
        &self,
        pipeline: impl Into<PipelineName>,
    ) -> Result<RunTicket, SchedulerError> {
        let pipeline = pipeline.into();
        self.send_result_command(
            |response| SchedulerCommand::Trigger { pipeline, response },
            "trigger",
        )
        .await
    }

    /// Trigger `pipeline` and wait for its report.
    pub async fn run_now(
        &self,
        pipeline: impl Into<PipelineName>,
    ) -> Result<RunReport, SchedulerError> {
        self.trigger(pipeline).await?.wait().await
    }

    /// Pause the scheduler.
    ///
    /// While paused, scheduled fires are not evaluated, but manual triggers still work.
    pub async fn pause(&self) -> Result<(), SchedulerError> {
        self.send_unit_command(|response| SchedulerCommand::Pause { response }, "pause")
            .await
    }

    /// Resume the scheduler after being paused.
    pub async fn resume(&self) -> Result<(), SchedulerError> {
        self.send_unit_command(|response| SchedulerCommand::Resume { response }, "resume")
            .await
    }

    /// Shutdown the scheduler, waiting (bounded) for in-flight runs.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        self.send_unit_command(
            |response| SchedulerCommand::Shutdown { response },
            "shutdown",
        )
        .await
    }

    /// Get the current scheduler state.
    pub async fn state(&self) -> SchedulerState {
        *self.state.read().await
    }

    /// Check if the scheduler is running.
    pub async fn is_running(&self) -> bool {
        *self.state.read().await == SchedulerState::Running
    }

    /// Check if the scheduler is paused.
    pub async fn is_paused(&self) -> bool {
        *self.state.read().await == SchedulerState::Paused
    }

    /// The loaded pipelines.
    pub fn registry(&self) -> &Arc<PipelineRegistry> {
        &self.registry
    }

    /// Trigger for `pipeline`, if it is scheduled.
    pub fn trigger_for(&self, pipeline: &PipelineName) -> Option<&ScheduledTrigger> {
        self.triggers.get(pipeline)
    }

    /// Next scheduled fire of `pipeline` after the current instant.
    pub fn next_fire(&self, pipeline: &PipelineName) -> Option<DateTime<Utc>> {
        self.triggers
            .get(pipeline)
            .and_then(|trigger| trigger.next_after(self.clock.now()).ok())
    }

    /// Whether a run of `pipeline` is in flight.
    pub fn is_in_flight(&self, pipeline: &PipelineName) -> bool {
        self.in_flight.is_in_flight(pipeline)
    }

    /// Pipelines with a run in flight.
    pub fn in_flight(&self) -> Vec<PipelineName> {
        self.in_flight.snapshot()
    }
}
