//! Durable job record tests against SQLite.

use crate::common::DAILY_STATS_SQL;
use cadence::repository::stale_jobs;
use cadence::testing::{ManualClock, ScriptedBackend};
use cadence::{
    ExecutionError, JobId, JobRepository, JobStatus, PipelineDefinition, PipelineJob,
    PipelineName, SUCCESS_MESSAGE, Scheduler, SqliteJobRepository, window,
};
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use tempfile::TempDir;

/// Test: Job records survive reopening the database.
#[tokio::test]
async fn test_job_records_survive_restart() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("jobs.db");
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 2, 1, 0, 0).unwrap(),
    ));

    let job_id = {
        let repo = Arc::new(SqliteJobRepository::new(&db_path).await.unwrap());
        let mut scheduler = Scheduler::new(repo.clone(), Arc::new(ScriptedBackend::succeeding()))
            .with_clock(clock.clone());
        scheduler
            .register(PipelineDefinition::new("daily_stats", DAILY_STATS_SQL))
            .unwrap();
        let (handle, task) = scheduler.start().await;

        let report = handle.run_now("daily_stats").await.unwrap();
        handle.shutdown().await.unwrap();
        let _ = task.await;
        repo.close().await;
        report.job_id
    };

    let repo = SqliteJobRepository::new(&db_path).await.unwrap();
    let job = repo.get_job(&job_id).await.unwrap();

    assert_eq!(job.pipeline.as_str(), "daily_stats");
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.message.as_deref(), Some(SUCCESS_MESSAGE));
    assert_eq!(job.window_from, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
    assert_eq!(job.window_to, Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap());
    assert!(job.duration_secs.unwrap() >= 0.0);
}

/// Test: Failures are stored with the backend's message, newest job first.
#[tokio::test]
async fn test_failed_runs_listed_newest_first() {
    let repo = Arc::new(SqliteJobRepository::in_memory().await.unwrap());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 2, 1, 0, 0).unwrap(),
    ));
    let backend = Arc::new(ScriptedBackend::failing(ExecutionError::Statement(
        "syntax error".to_string(),
    )));

    let mut scheduler = Scheduler::new(repo.clone(), backend).with_clock(clock.clone());
    scheduler
        .register(PipelineDefinition::new("daily_stats", "SELEC"))
        .unwrap();
    let (handle, task) = scheduler.start().await;

    let first = handle.run_now("daily_stats").await.unwrap();
    clock.advance(chrono::Duration::days(1));
    let second = handle.run_now("daily_stats").await.unwrap();

    let jobs = repo
        .list_jobs(&PipelineName::new("daily_stats"), 10)
        .await
        .unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].id, second.job_id);
    assert_eq!(jobs[1].id, first.job_id);
    assert!(jobs.iter().all(|j| j.status == JobStatus::Failed));
    assert!(jobs.iter().all(|j| j.message.as_deref() == Some("syntax error")));

    handle.shutdown().await.unwrap();
    let _ = task.await;
}

/// Test: Jobs left RUNNING by a crash are reported as stale, not rewritten.
#[tokio::test]
async fn test_stale_running_jobs_are_reported() {
    let repo = SqliteJobRepository::in_memory().await.unwrap();
    let crashed_at = Utc.with_ymd_and_hms(2024, 3, 1, 1, 0, 0).unwrap();
    let crashed = PipelineJob::running(
        JobId::new(),
        PipelineName::new("daily_stats"),
        window(crashed_at),
        crashed_at,
    );
    let crashed_id = repo.create_run(crashed).await.unwrap();

    let cutoff = Utc.with_ymd_and_hms(2024, 3, 2, 1, 0, 0).unwrap();
    let stale = stale_jobs(&repo, cutoff).await.unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].id, crashed_id);

    // Reporting leaves the record untouched
    let job = repo.get_job(&crashed_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Running);
}
