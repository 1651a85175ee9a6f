//! Scheduled and manual run tests.

use crate::common::{DAILY_STATS_SQL, wait_for_job_status, wait_for_jobs};
use cadence::testing::{
    GatedBackend, ManualClock, PanickingRepository, RecordingHandler, ScriptedBackend,
    UnavailableRepository,
};
use cadence::{
    Event, EventBus, ExecutionError, InMemoryJobRepository, JobRepository, JobStatus,
    PipelineDefinition, PipelineName, RunOutcome, SUCCESS_MESSAGE, Scheduler, SchedulerError,
};
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

const TICK: Duration = Duration::from_millis(10);
const TIMEOUT: Duration = Duration::from_secs(5);

/// Test: daily_stats fires at 01:00 UTC for the previous day, and a manual
/// trigger while that run executes creates no second job.
#[tokio::test]
async fn test_daily_stats_fires_for_previous_day() {
    let repo = Arc::new(InMemoryJobRepository::new());
    let backend = Arc::new(GatedBackend::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 2, 0, 59, 59).unwrap(),
    ));

    let mut scheduler = Scheduler::new(repo.clone(), backend.clone())
        .with_clock(clock.clone())
        .with_tick_interval(TICK);
    scheduler
        .register(PipelineDefinition::new("daily_stats", DAILY_STATS_SQL).with_schedule("0 1 * * *"))
        .unwrap();
    let (handle, task) = scheduler.start().await;

    clock.set(Utc.with_ymd_and_hms(2024, 3, 2, 1, 0, 0).unwrap());
    backend.wait_entered(1, TIMEOUT).await;

    let jobs = wait_for_jobs(repo.as_ref(), "daily_stats", 1, TIMEOUT).await;
    let job = &jobs[0];
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.window_from, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
    assert_eq!(job.window_to, Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap());

    let calls = backend.calls();
    assert_eq!(calls[0].statement, DAILY_STATS_SQL);
    assert_eq!(calls[0].params.from, "2024-03-01 00:00:00");
    assert_eq!(calls[0].params.to, "2024-03-02 00:00:00");

    // Manual trigger at 01:00:05 while the scheduled run is still executing
    clock.set(Utc.with_ymd_and_hms(2024, 3, 2, 1, 0, 5).unwrap());
    let err = handle.trigger("daily_stats").await.unwrap_err();
    assert!(matches!(err, SchedulerError::AlreadyRunning(_)));
    assert_eq!(repo.len(), 1);
    assert_eq!(backend.entered(), 1);

    backend.release();
    let finished =
        wait_for_job_status(repo.as_ref(), &job.id, JobStatus::Succeeded, TIMEOUT).await;
    assert_eq!(finished.message.as_deref(), Some(SUCCESS_MESSAGE));
    assert!(finished.duration_secs.unwrap() >= 0.0);

    handle.shutdown().await.unwrap();
    let _ = task.await;
}

/// Test: Overrun prevention is scoped per pipeline.
#[tokio::test]
async fn test_overrun_prevention_is_per_pipeline() {
    let repo = Arc::new(InMemoryJobRepository::new());
    let backend = Arc::new(GatedBackend::new());

    let mut scheduler = Scheduler::new(repo.clone(), backend.clone()).with_tick_interval(TICK);
    scheduler
        .register(PipelineDefinition::new("orders", "SELECT 1"))
        .unwrap();
    scheduler
        .register(PipelineDefinition::new("sessions", "SELECT 2"))
        .unwrap();
    let (handle, task) = scheduler.start().await;

    let orders = handle.trigger("orders").await.unwrap();
    backend.wait_entered(1, TIMEOUT).await;

    // A different pipeline still runs while orders is in flight
    let sessions = handle.trigger("sessions").await.unwrap();
    backend.wait_entered(2, TIMEOUT).await;

    let err = handle.trigger("orders").await.unwrap_err();
    assert!(matches!(err, SchedulerError::AlreadyRunning(ref name) if name.as_str() == "orders"));
    assert_eq!(backend.entered(), 2);

    let mut in_flight: Vec<String> = handle.in_flight().iter().map(|n| n.to_string()).collect();
    in_flight.sort();
    assert_eq!(in_flight, vec!["orders", "sessions"]);

    backend.release();
    assert!(orders.wait().await.unwrap().outcome.is_success());
    assert!(sessions.wait().await.unwrap().outcome.is_success());
    assert!(handle.in_flight().is_empty());

    handle.shutdown().await.unwrap();
    let _ = task.await;
}

/// Test: A scheduled fire of an in-flight pipeline is dropped while another
/// pipeline's fires keep running.
#[tokio::test]
async fn test_scheduled_overrun_skips_only_the_busy_pipeline() {
    const ORDERS_SQL: &str = "INSERT INTO order_stats SELECT 1";
    const SESSIONS_SQL: &str = "INSERT INTO session_stats SELECT 1";

    let repo = Arc::new(InMemoryJobRepository::new());
    let backend = Arc::new(GatedBackend::holding([ORDERS_SQL]));
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 2, 1, 0, 30).unwrap(),
    ));
    let recorder = Arc::new(RecordingHandler::new());
    let bus = Arc::new(EventBus::new());
    bus.register(recorder.clone()).await;

    let mut scheduler = Scheduler::new(repo.clone(), backend.clone())
        .with_clock(clock.clone())
        .with_event_bus(bus)
        .with_tick_interval(TICK);
    scheduler
        .register(PipelineDefinition::new("orders", ORDERS_SQL).with_schedule("* * * * *"))
        .unwrap();
    scheduler
        .register(PipelineDefinition::new("sessions", SESSIONS_SQL).with_schedule("* * * * *"))
        .unwrap();
    let (handle, task) = scheduler.start().await;
    let sessions = PipelineName::new("sessions");

    // First minute: both fire, orders stays in flight
    clock.set(Utc.with_ymd_and_hms(2024, 3, 2, 1, 1, 0).unwrap());
    let first = wait_for_jobs(repo.as_ref(), "sessions", 1, TIMEOUT).await;
    wait_for_job_status(repo.as_ref(), &first[0].id, JobStatus::Succeeded, TIMEOUT).await;
    wait_for_jobs(repo.as_ref(), "orders", 1, TIMEOUT).await;
    let start = tokio::time::Instant::now();
    while handle.is_in_flight(&sessions) {
        assert!(start.elapsed() < TIMEOUT, "sessions run never released");
        tokio::time::sleep(TICK).await;
    }

    // Second minute: orders is skipped, sessions runs again
    clock.set(Utc.with_ymd_and_hms(2024, 3, 2, 1, 2, 0).unwrap());
    let jobs = wait_for_jobs(repo.as_ref(), "sessions", 2, TIMEOUT).await;
    for job in &jobs {
        wait_for_job_status(repo.as_ref(), &job.id, JobStatus::Succeeded, TIMEOUT).await;
    }

    let start = tokio::time::Instant::now();
    loop {
        let events = recorder.events().await;
        let skipped: Vec<&str> = events
            .iter()
            .filter(|e| matches!(e, Event::FireSkipped { .. }))
            .map(|e| e.pipeline().as_str())
            .collect();
        if !skipped.is_empty() {
            assert_eq!(skipped, vec!["orders"]);
            break;
        }
        assert!(start.elapsed() < TIMEOUT, "no skipped fire recorded for orders");
        tokio::time::sleep(TICK).await;
    }

    assert_eq!(backend.calls_for(ORDERS_SQL), 1);
    assert_eq!(backend.calls_for(SESSIONS_SQL), 2);
    let orders = repo
        .list_jobs(&PipelineName::new("orders"), 10)
        .await
        .unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, JobStatus::Running);

    backend.release();
    handle.shutdown().await.unwrap();
    let _ = task.await;
}

/// Test: A backend failure becomes a FAILED job and nothing else.
#[tokio::test]
async fn test_backend_failure_recorded_as_failed_job() {
    let repo = Arc::new(InMemoryJobRepository::new());
    let backend = Arc::new(ScriptedBackend::failing(ExecutionError::Statement(
        "syntax error".to_string(),
    )));

    let mut scheduler = Scheduler::new(repo.clone(), backend);
    scheduler
        .register(PipelineDefinition::new("daily_stats", "SELEC oops"))
        .unwrap();
    let (handle, task) = scheduler.start().await;

    let report = handle.run_now("daily_stats").await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Failed("syntax error".to_string()));

    let jobs = repo
        .list_jobs(&PipelineName::new("daily_stats"), 10)
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Failed);
    assert_eq!(jobs[0].message.as_deref(), Some("syntax error"));
    assert!(jobs[0].duration_secs.unwrap() >= 0.0);
    assert!(handle.is_running().await);

    handle.shutdown().await.unwrap();
    let _ = task.await;
}

/// Test: A defect escaping one pipeline's run does not stop the others.
#[tokio::test]
async fn test_scheduler_defect_does_not_stop_other_pipelines() {
    let repo = Arc::new(PanickingRepository::new(["broken"]));
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 2, 1, 0, 30).unwrap(),
    ));

    let mut scheduler = Scheduler::new(repo.clone(), Arc::new(ScriptedBackend::succeeding()))
        .with_clock(clock.clone())
        .with_tick_interval(TICK);
    scheduler
        .register(PipelineDefinition::new("broken", "SELECT 1").with_schedule("* * * * *"))
        .unwrap();
    scheduler
        .register(PipelineDefinition::new("healthy", "SELECT 1").with_schedule("* * * * *"))
        .unwrap();
    let (handle, task) = scheduler.start().await;

    clock.set(Utc.with_ymd_and_hms(2024, 3, 2, 1, 1, 0).unwrap());
    wait_for_jobs(repo.inner(), "healthy", 1, TIMEOUT).await;

    clock.set(Utc.with_ymd_and_hms(2024, 3, 2, 1, 2, 0).unwrap());
    wait_for_jobs(repo.inner(), "healthy", 2, TIMEOUT).await;

    assert!(handle.is_running().await);
    let broken = repo
        .list_jobs(&PipelineName::new("broken"), 10)
        .await
        .unwrap();
    assert!(broken.is_empty());

    // The defect released the in-flight flag
    let err = handle.run_now("broken").await.unwrap_err();
    assert!(matches!(err, SchedulerError::RunAborted(ref m) if m.starts_with("scheduler defect")));

    handle.shutdown().await.unwrap();
    let _ = task.await;
}

/// Test: An unreachable repository aborts the run before the backend is called.
#[tokio::test]
async fn test_unreachable_repository_aborts_before_backend() {
    let backend = Arc::new(ScriptedBackend::succeeding());
    let mut scheduler = Scheduler::new(Arc::new(UnavailableRepository::new()), backend.clone());
    scheduler
        .register(PipelineDefinition::new("daily_stats", DAILY_STATS_SQL))
        .unwrap();
    let (handle, task) = scheduler.start().await;

    let err = handle.run_now("daily_stats").await.unwrap_err();
    assert!(matches!(err, SchedulerError::RunAborted(ref m) if m.contains("failed to open job")));
    assert!(backend.calls().is_empty());
    assert!(!handle.is_in_flight(&PipelineName::new("daily_stats")));

    handle.shutdown().await.unwrap();
    let _ = task.await;
}
