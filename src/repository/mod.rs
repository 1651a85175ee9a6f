//! Job record persistence.
//!
//! Every run owns exactly one [`PipelineJob`]. It is created `RUNNING` before
//! the backend is touched and moved to one terminal status afterwards. The
//! [`JobRepository`] trait abstracts over pluggable backends (in-memory,
//! SQLite).

mod memory;
mod sqlite;

pub use memory::InMemoryJobRepository;
pub use sqlite::SqliteJobRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::core::types::{JobId, PipelineName};
use crate::core::window::TimeWindow;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The requested job was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A different job already uses this id.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// The requested status change is not allowed.
    #[error("invalid transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    /// Repository lock was poisoned.
    #[error("repository lock poisoned")]
    LockPoisoned,

    /// Stored data could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// The underlying store is unavailable or failed.
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Status of a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// The run is executing.
    Running,
    /// The backend reported success.
    Succeeded,
    /// The backend reported failure.
    Failed,
}

impl JobStatus {
    /// Whether no further transition is allowed.
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Running)
    }

    /// Stable textual form used in storage and APIs.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Running => "RUNNING",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
        }
    }

    /// Parse the textual form produced by [`JobStatus::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RUNNING" => Some(JobStatus::Running),
            "SUCCEEDED" => Some(JobStatus::Succeeded),
            "FAILED" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted record of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineJob {
    /// Unique job identifier.
    pub id: JobId,
    /// Owning pipeline.
    pub pipeline: PipelineName,
    /// Current status.
    pub status: JobStatus,
    /// Inclusive start of the processed window.
    pub window_from: DateTime<Utc>,
    /// Exclusive end of the processed window.
    pub window_to: DateTime<Utc>,
    /// Result message (set when terminal).
    pub message: Option<String>,
    /// Elapsed execution time in seconds (set when terminal).
    pub duration_secs: Option<f64>,
    /// When the job was opened.
    pub created_at: DateTime<Utc>,
    /// When the job reached its terminal status.
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineJob {
    /// A fresh `RUNNING` job for `window`.
    pub fn running(
        id: JobId,
        pipeline: PipelineName,
        window: TimeWindow,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            pipeline,
            status: JobStatus::Running,
            window_from: window.from(),
            window_to: window.to(),
            message: None,
            duration_secs: None,
            created_at,
            finished_at: None,
        }
    }

    /// Apply a terminal transition.
    ///
    /// Repeating the terminal status a job already has is accepted so that
    /// retried writes stay harmless. The first recorded message, duration and
    /// finish time are kept.
    pub fn finish(&mut self, completion: &JobCompletion) -> Result<(), RepositoryError> {
        if !completion.status.is_terminal() {
            return Err(RepositoryError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: completion.status,
            });
        }

        if self.status.is_terminal() {
            if self.status == completion.status {
                return Ok(());
            }
            return Err(RepositoryError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: completion.status,
            });
        }

        self.status = completion.status;
        self.message = Some(completion.message.clone());
        self.duration_secs = Some(completion.duration_secs);
        self.finished_at = Some(completion.finished_at);
        Ok(())
    }

    /// Whether this job is still `RUNNING` and was opened before `cutoff`.
    pub fn is_stale(&self, cutoff: DateTime<Utc>) -> bool {
        self.status == JobStatus::Running && self.created_at < cutoff
    }
}

/// Terminal update applied by [`JobRepository::finish_run`].
#[derive(Debug, Clone, PartialEq)]
pub struct JobCompletion {
    pub status: JobStatus,
    pub message: String,
    pub duration_secs: f64,
    pub finished_at: DateTime<Utc>,
}

/// Repository trait for persisting job records.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Persist a new `RUNNING` job and return its id.
    ///
    /// Re-submitting the same job (same id, pipeline and window, still
    /// running) succeeds without creating a second record.
    async fn create_run(&self, job: PipelineJob) -> Result<JobId, RepositoryError>;

    /// Move a job to a terminal status.
    async fn finish_run(&self, id: &JobId, completion: JobCompletion)
    -> Result<(), RepositoryError>;

    /// Get a job by id.
    async fn get_job(&self, id: &JobId) -> Result<PipelineJob, RepositoryError>;

    /// List jobs of a pipeline, most recent first, at most `limit`.
    async fn list_jobs(
        &self,
        pipeline: &PipelineName,
        limit: usize,
    ) -> Result<Vec<PipelineJob>, RepositoryError>;

    /// All jobs still `RUNNING`, oldest first.
    async fn list_running(&self) -> Result<Vec<PipelineJob>, RepositoryError>;
}

/// Whether `incoming` is a harmless retry of `existing`.
pub(crate) fn is_same_open_job(existing: &PipelineJob, incoming: &PipelineJob) -> bool {
    existing.status == JobStatus::Running
        && existing.pipeline == incoming.pipeline
        && existing.window_from == incoming.window_from
        && existing.window_to == incoming.window_to
}

/// `RUNNING` jobs opened before `cutoff`, oldest first.
///
/// After a crash these jobs never reach a terminal status; they are only
/// reported, never rewritten.
pub async fn stale_jobs<R: JobRepository + ?Sized>(
    repository: &R,
    cutoff: DateTime<Utc>,
) -> Result<Vec<PipelineJob>, RepositoryError> {
    let running = repository.list_running().await?;
    Ok(running
        .into_iter()
        .filter(|job| job.is_stale(cutoff))
        .collect())
}
