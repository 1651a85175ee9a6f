//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use cadence::config::{PIPELINE_CONFIG_FILE, PIPELINE_STATEMENT_FILE};
use cadence::{JobId, JobRepository, JobStatus, PipelineJob, PipelineName};
use std::path::Path;
use std::time::Duration;

/// Statement used by the `daily_stats` fixtures.
pub const DAILY_STATS_SQL: &str = "INSERT INTO daily_stats (day, events) \
     SELECT DATE(ts), COUNT(*) FROM events WHERE ts >= :from AND ts < :to GROUP BY DATE(ts)";

/// Write a pipeline directory; `None` leaves the file out.
pub fn write_pipeline(root: &Path, name: &str, sql: Option<&str>, config: Option<&str>) {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    if let Some(sql) = sql {
        std::fs::write(dir.join(PIPELINE_STATEMENT_FILE), sql).unwrap();
    }
    if let Some(config) = config {
        std::fs::write(dir.join(PIPELINE_CONFIG_FILE), config).unwrap();
    }
}

/// Wait for a job to reach an expected status, polling the repository.
///
/// This is more reliable than fixed sleeps since execution time can vary.
/// Polls every 10ms and times out after the specified duration.
///
/// # Panics
///
/// Panics if the timeout is reached before the job reaches the expected status.
pub async fn wait_for_job_status(
    repository: &dyn JobRepository,
    job_id: &JobId,
    expected: JobStatus,
    timeout: Duration,
) -> PipelineJob {
    let start = tokio::time::Instant::now();
    loop {
        let job = repository.get_job(job_id).await.unwrap();
        if job.status == expected {
            return job;
        }
        if start.elapsed() > timeout {
            panic!(
                "Timeout waiting for job {} to reach {:?}, current status: {:?}",
                job_id, expected, job.status
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until a pipeline has at least `count` job records, newest first.
///
/// # Panics
///
/// Panics if the timeout is reached first.
pub async fn wait_for_jobs(
    repository: &dyn JobRepository,
    pipeline: &str,
    count: usize,
    timeout: Duration,
) -> Vec<PipelineJob> {
    let start = tokio::time::Instant::now();
    loop {
        let jobs = repository
            .list_jobs(&PipelineName::new(pipeline), 100)
            .await
            .unwrap();
        if jobs.len() >= count {
            return jobs;
        }
        if start.elapsed() > timeout {
            panic!(
                "Timeout waiting for {} job(s) of {}, found {}",
                count,
                pipeline,
                jobs.len()
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
