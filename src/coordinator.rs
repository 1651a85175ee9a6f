//! Single run orchestration.
//!
//! [`RunCoordinator::execute`] is the one path every run takes, scheduled
//! or manual: compute the window, open a `RUNNING` job, call the backend,
//! close the job with exactly one terminal status. Backend failures (and
//! backend panics) become `FAILED` jobs; only job record failures surface
//! as [`RunError`].

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use crate::backend::ExecutionBackend;
use crate::core::clock::{Clock, SystemClock};
use crate::core::pipeline::PipelineDefinition;
use crate::core::types::{JobId, PipelineName};
use crate::core::window::{TimeWindow, WindowPolicy};
use crate::events::{Event, EventBus};
use crate::repository::{JobCompletion, JobRepository, JobStatus, PipelineJob, RepositoryError};

/// Message recorded on every successful job.
pub const SUCCESS_MESSAGE: &str = "Query OK!";

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "message", rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    Failed(String),
}

impl RunOutcome {
    /// Terminal job status for this outcome.
    pub fn status(&self) -> JobStatus {
        match self {
            RunOutcome::Succeeded => JobStatus::Succeeded,
            RunOutcome::Failed(_) => JobStatus::Failed,
        }
    }

    /// Message persisted with the job.
    pub fn message(&self) -> &str {
        match self {
            RunOutcome::Succeeded => SUCCESS_MESSAGE,
            RunOutcome::Failed(message) => message,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Succeeded)
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub job_id: JobId,
    pub pipeline: PipelineName,
    pub window: TimeWindow,
    pub outcome: RunOutcome,
    pub duration_secs: f64,
    /// Rows written, when the backend reports it.
    pub rows_affected: Option<u64>,
}

/// Job record failures that abort a run.
#[derive(Debug, Error)]
pub enum RunError {
    /// The `RUNNING` job could not be created; the backend was not called.
    #[error("failed to open job for pipeline '{pipeline}': {source}")]
    OpenJob {
        pipeline: PipelineName,
        #[source]
        source: RepositoryError,
    },

    /// The backend ran but its outcome could not be recorded.
    #[error("failed to close job {job_id} of pipeline '{pipeline}': {source}")]
    CloseJob {
        pipeline: PipelineName,
        job_id: JobId,
        outcome: RunOutcome,
        #[source]
        source: RepositoryError,
    },
}

impl RunError {
    pub fn pipeline(&self) -> &PipelineName {
        match self {
            RunError::OpenJob { pipeline, .. } | RunError::CloseJob { pipeline, .. } => pipeline,
        }
    }
}

/// Runs pipelines against a repository and a backend.
pub struct RunCoordinator<R: JobRepository> {
    repository: Arc<R>,
    backend: Arc<dyn ExecutionBackend>,
    clock: Arc<dyn Clock>,
    window_policy: WindowPolicy,
    event_bus: Option<Arc<EventBus>>,
}

impl<R: JobRepository> Clone for RunCoordinator<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            backend: Arc::clone(&self.backend),
            clock: Arc::clone(&self.clock),
            window_policy: self.window_policy,
            event_bus: self.event_bus.clone(),
        }
    }
}

impl<R: JobRepository + 'static> RunCoordinator<R> {
    /// Create a coordinator using the system clock and one-day windows.
    pub fn new(repository: Arc<R>, backend: Arc<dyn ExecutionBackend>) -> Self {
        Self {
            repository,
            backend,
            clock: Arc::new(SystemClock),
            window_policy: WindowPolicy::daily(),
            event_bus: None,
        }
    }

    /// Read time from `clock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Window size for pipelines without their own override.
    pub fn with_window_policy(mut self, policy: WindowPolicy) -> Self {
        self.window_policy = policy;
        self
    }

    /// Publish lifecycle events on `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn window_for(&self, pipeline: &PipelineDefinition, now: DateTime<Utc>) -> TimeWindow {
        pipeline
            .window()
            .unwrap_or(self.window_policy)
            .window(now)
    }

    /// Run `pipeline` once.
    pub async fn execute(&self, pipeline: &PipelineDefinition) -> Result<RunReport, RunError> {
        let name = pipeline.name().clone();
        let opened_at = self.clock.now();
        let window = self.window_for(pipeline, opened_at);

        let job = PipelineJob::running(JobId::new(), name.clone(), window, opened_at);
        let job_id = match self.repository.create_run(job).await {
            Ok(id) => id,
            Err(source) => {
                tracing::error!(
                    pipeline = %name,
                    from = %window.from(),
                    to = %window.to(),
                    error = %source,
                    "infrastructure failure: could not open job, run aborted"
                );
                self.emit(Event::run_aborted(name.clone(), None, source.to_string()))
                    .await;
                return Err(RunError::OpenJob {
                    pipeline: name,
                    source,
                });
            }
        };

        tracing::info!(
            pipeline = %name,
            job_id = %job_id,
            from = %window.from(),
            to = %window.to(),
            "starting pipeline run"
        );
        self.emit(Event::run_started(name.clone(), job_id, window))
            .await;

        let started = Instant::now();
        let params = window.params();
        let result = AssertUnwindSafe(self.backend.execute(pipeline.statement(), &params))
            .catch_unwind()
            .await;
        let elapsed = started.elapsed();
        let duration_secs = elapsed.as_secs_f64();

        let (outcome, rows_affected) = match result {
            Ok(Ok(stats)) => (RunOutcome::Succeeded, Some(stats.rows_affected)),
            Ok(Err(e)) => (RunOutcome::Failed(e.to_string()), None),
            Err(payload) => (
                RunOutcome::Failed(format!(
                    "execution backend panicked: {}",
                    panic_message(payload.as_ref())
                )),
                None,
            ),
        };

        let completion = JobCompletion {
            status: outcome.status(),
            message: outcome.message().to_string(),
            duration_secs,
            finished_at: self.clock.now(),
        };
        if let Err(source) = self.repository.finish_run(&job_id, completion).await {
            tracing::error!(
                pipeline = %name,
                job_id = %job_id,
                outcome = outcome.status().as_str(),
                error = %source,
                "infrastructure failure: could not close job"
            );
            self.emit(Event::run_aborted(
                name.clone(),
                Some(job_id),
                source.to_string(),
            ))
            .await;
            return Err(RunError::CloseJob {
                pipeline: name,
                job_id,
                outcome,
                source,
            });
        }

        match &outcome {
            RunOutcome::Succeeded => tracing::info!(
                pipeline = %name,
                job_id = %job_id,
                from = %window.from(),
                to = %window.to(),
                duration_secs,
                "pipeline run succeeded"
            ),
            RunOutcome::Failed(message) => tracing::error!(
                pipeline = %name,
                job_id = %job_id,
                from = %window.from(),
                to = %window.to(),
                duration_secs,
                error = %message,
                "pipeline run failed"
            ),
        }

        self.emit(Event::run_finished(
            name.clone(),
            job_id,
            outcome.status(),
            outcome.message(),
            elapsed,
        ))
        .await;

        Ok(RunReport {
            job_id,
            pipeline: name,
            window,
            outcome,
            duration_secs,
            rows_affected,
        })
    }

    async fn emit(&self, event: Event) {
        if let Some(bus) = &self.event_bus {
            bus.emit(event).await;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
