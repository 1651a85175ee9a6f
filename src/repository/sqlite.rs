//! SQLite job repository.
//!
//! Provides persistent job records using a SQLite database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use super::{
    JobCompletion, JobRepository, JobStatus, PipelineJob, RepositoryError, is_same_open_job,
};
use crate::core::types::{JobId, PipelineName};

const JOB_COLUMNS: &str = "id, pipeline, status, window_from, window_to, message, duration_secs, created_at, finished_at";

type JobRow = (
    String,
    String,
    String,
    i64,
    i64,
    Option<String>,
    Option<f64>,
    i64,
    Option<i64>,
);

/// SQLite job repository.
///
/// Provides persistent storage with automatic schema migration.
pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    /// Open (or create) the database at `path` and run migrations.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let path_str = path.as_ref().to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(unavailable)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(unavailable)?;

        let repository = Self { pool };
        repository.run_migrations().await?;
        Ok(repository)
    }

    /// Create an in-memory SQLite database (useful for testing).
    pub async fn in_memory() -> Result<Self, RepositoryError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(unavailable)?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(unavailable)?;

        let repository = Self { pool };
        repository.run_migrations().await?;
        Ok(repository)
    }

    async fn run_migrations(&self) -> Result<(), RepositoryError> {
        let schema = include_str!("../../migrations/001_pipeline_jobs.sql");
        sqlx::raw_sql(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Unavailable(format!("migration failed: {}", e)))?;
        Ok(())
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn fetch_job(&self, id: &JobId) -> Result<Option<PipelineJob>, RepositoryError> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM pipeline_jobs WHERE id = ?",
            JOB_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.map(row_to_job).transpose()
    }
}

fn unavailable(e: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Unavailable(e.to_string())
}

fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| RepositoryError::Corrupt(format!("timestamp out of range: {}", millis)))
}

fn row_to_job(row: JobRow) -> Result<PipelineJob, RepositoryError> {
    let id = JobId::parse(&row.0)
        .map_err(|e| RepositoryError::Corrupt(format!("invalid job id {}: {}", row.0, e)))?;
    let status = JobStatus::parse(&row.2)
        .ok_or_else(|| RepositoryError::Corrupt(format!("invalid status: {}", row.2)))?;

    Ok(PipelineJob {
        id,
        pipeline: PipelineName::new(row.1),
        status,
        window_from: from_millis(row.3)?,
        window_to: from_millis(row.4)?,
        message: row.5,
        duration_secs: row.6,
        created_at: from_millis(row.7)?,
        finished_at: row.8.map(from_millis).transpose()?,
    })
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn create_run(&self, job: PipelineJob) -> Result<JobId, RepositoryError> {
        if job.status != JobStatus::Running {
            return Err(RepositoryError::InvalidTransition {
                id: job.id,
                from: JobStatus::Running,
                to: job.status,
            });
        }

        let result = sqlx::query(
            r#"
            INSERT INTO pipeline_jobs (id, pipeline, status, window_from, window_to, message, duration_secs, created_at, finished_at)
            VALUES (?, ?, ?, ?, ?, NULL, NULL, ?, NULL)
            "#,
        )
        .bind(job.id.to_string())
        .bind(job.pipeline.as_str())
        .bind(job.status.as_str())
        .bind(to_millis(job.window_from))
        .bind(to_millis(job.window_to))
        .bind(to_millis(job.created_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(job.id),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                match self.fetch_job(&job.id).await? {
                    Some(existing) if is_same_open_job(&existing, &job) => Ok(job.id),
                    _ => Err(RepositoryError::DuplicateKey(format!("job: {}", job.id))),
                }
            }
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn finish_run(
        &self,
        id: &JobId,
        completion: JobCompletion,
    ) -> Result<(), RepositoryError> {
        let mut job = self
            .fetch_job(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("job: {}", id)))?;

        let was_terminal = job.status.is_terminal();
        job.finish(&completion)?;
        if was_terminal {
            // Same terminal status again, the first record stands
            return Ok(());
        }

        let result = sqlx::query(
            r#"
            UPDATE pipeline_jobs SET status = ?, message = ?, duration_secs = ?, finished_at = ?
            WHERE id = ? AND status = 'RUNNING'
            "#,
        )
        .bind(job.status.as_str())
        .bind(&job.message)
        .bind(job.duration_secs)
        .bind(job.finished_at.map(to_millis))
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        if result.rows_affected() == 0 {
            // Someone else closed the job between the read and the update
            let mut current = self
                .fetch_job(id)
                .await?
                .ok_or_else(|| RepositoryError::NotFound(format!("job: {}", id)))?;
            return current.finish(&completion);
        }
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> Result<PipelineJob, RepositoryError> {
        self.fetch_job(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("job: {}", id)))
    }

    async fn list_jobs(
        &self,
        pipeline: &PipelineName,
        limit: usize,
    ) -> Result<Vec<PipelineJob>, RepositoryError> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM pipeline_jobs WHERE pipeline = ? ORDER BY created_at DESC, id DESC LIMIT ?",
            JOB_COLUMNS
        ))
        .bind(pipeline.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.into_iter().map(row_to_job).collect()
    }

    async fn list_running(&self) -> Result<Vec<PipelineJob>, RepositoryError> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM pipeline_jobs WHERE status = 'RUNNING' ORDER BY created_at, id",
            JOB_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.into_iter().map(row_to_job).collect()
    }
}
