//! API integration tests.
//!
//! These tests drive the router directly and verify status codes and bodies.

use crate::common::{DAILY_STATS_SQL, wait_for_job_status};
use cadence::api::{ApiState, build_router, create_api_state};
use cadence::testing::{GatedBackend, ManualClock};
use cadence::{
    ExecutionBackend, InMemoryJobRepository, JobId, JobStatus, PipelineDefinition, Scheduler,
    SchedulerHandle, WindowPolicy,
};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const TIMEOUT: Duration = Duration::from_secs(5);

struct TestApp {
    state: ApiState<InMemoryJobRepository>,
    handle: SchedulerHandle,
    repo: Arc<InMemoryJobRepository>,
}

/// Create a test API state with one scheduled and one manual pipeline.
async fn create_test_app(backend: Arc<dyn ExecutionBackend>) -> TestApp {
    let repo = Arc::new(InMemoryJobRepository::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 2, 0, 30, 0).unwrap(),
    ));
    let mut scheduler = Scheduler::new(Arc::clone(&repo), backend).with_clock(clock);

    scheduler
        .register(PipelineDefinition::new("daily_stats", DAILY_STATS_SQL).with_schedule("0 1 * * *"))
        .unwrap();
    scheduler
        .register(
            PipelineDefinition::new("weekly_rollup", "SELECT 1")
                .with_window(WindowPolicy::days(7).unwrap()),
        )
        .unwrap();

    let (handle, _task) = scheduler.start().await;

    TestApp {
        state: create_api_state(handle.clone(), Arc::clone(&repo)),
        handle,
        repo,
    }
}

async fn released_app() -> TestApp {
    let backend = Arc::new(GatedBackend::new());
    backend.release();
    create_test_app(backend).await
}

async fn send(app: &TestApp, method: &str, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    let response = build_router(app.state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

/// Test: Health endpoint responds with status ok.
#[tokio::test]
async fn test_health_endpoint() {
    let app = released_app().await;

    let (status, json) = send(&app, "GET", "/api/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

/// Test: Scheduler state can be read, paused and resumed.
#[tokio::test]
async fn test_scheduler_state_pause_and_resume() {
    let app = released_app().await;

    let (status, json) = send(&app, "GET", "/api/scheduler/state").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "running");
    assert_eq!(json["is_running"], true);
    assert_eq!(json["in_flight"], serde_json::json!([]));

    let (status, _) = send(&app, "POST", "/api/scheduler/pause").await;
    assert_eq!(status, StatusCode::OK);
    let (_, json) = send(&app, "GET", "/api/scheduler/state").await;
    assert_eq!(json["state"], "paused");
    assert_eq!(json["is_paused"], true);

    let (status, json) = send(&app, "POST", "/api/scheduler/resume").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "scheduler resumed");
    assert!(app.handle.is_running().await);
}

/// Test: Pipelines are listed with their schedule and next fire.
#[tokio::test]
async fn test_list_pipelines_endpoint() {
    let app = released_app().await;

    let (status, json) = send(&app, "GET", "/api/pipelines").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 2);
    let daily = &json["pipelines"][0];
    assert_eq!(daily["name"], "daily_stats");
    assert_eq!(daily["schedule"], "0 1 * * *");
    assert_eq!(daily["timezone"], "UTC");
    assert_eq!(daily["next_fire"], "2024-03-02T01:00:00Z");
    assert_eq!(daily["in_flight"], false);

    let weekly = &json["pipelines"][1];
    assert_eq!(weekly["name"], "weekly_rollup");
    assert!(weekly["schedule"].is_null());
    assert_eq!(weekly["window_days"], 7);
}

/// Test: A single pipeline includes its statement; unknown names are 404.
#[tokio::test]
async fn test_get_pipeline_endpoint() {
    let app = released_app().await;

    let (status, json) = send(&app, "GET", "/api/pipelines/daily_stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["name"], "daily_stats");
    assert_eq!(json["statement"], DAILY_STATS_SQL);

    let (status, json) = send(&app, "GET", "/api/pipelines/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
}

/// Test: Triggering runs the pipeline and the job becomes visible.
#[tokio::test]
async fn test_trigger_then_read_jobs() {
    let app = released_app().await;

    let (status, json) = send(&app, "POST", "/api/pipelines/weekly_rollup/trigger").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["pipeline"], "weekly_rollup");

    let start = tokio::time::Instant::now();
    let job_id = loop {
        let (_, json) = send(&app, "GET", "/api/pipelines/weekly_rollup/jobs?limit=5").await;
        if json["count"] == 1 {
            break JobId::parse(json["jobs"][0]["id"].as_str().unwrap()).unwrap();
        }
        assert!(start.elapsed() < TIMEOUT, "job never listed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    wait_for_job_status(app.repo.as_ref(), &job_id, JobStatus::Succeeded, TIMEOUT).await;

    let (status, json) = send(&app, "GET", &format!("/api/jobs/{}", job_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "SUCCEEDED");
    assert_eq!(json["message"], "Query OK!");
    assert_eq!(json["window_from"], "2024-02-24T00:00:00Z");
    assert_eq!(json["window_to"], "2024-03-02T00:00:00Z");
}

/// Test: Triggering a pipeline with a run in flight is a conflict.
#[tokio::test]
async fn test_trigger_conflict_while_in_flight() {
    let backend = Arc::new(GatedBackend::new());
    let app = create_test_app(backend.clone()).await;

    let (status, _) = send(&app, "POST", "/api/pipelines/daily_stats/trigger").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    backend.wait_entered(1, TIMEOUT).await;

    let (status, json) = send(&app, "POST", "/api/pipelines/daily_stats/trigger").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "CONFLICT");
    assert_eq!(app.repo.len(), 1);

    let (_, json) = send(&app, "GET", "/api/scheduler/state").await;
    assert_eq!(json["in_flight"], serde_json::json!(["daily_stats"]));

    backend.release();
}

/// Test: Unknown pipelines and job ids are 404.
#[tokio::test]
async fn test_not_found_responses() {
    let app = released_app().await;

    let (status, _) = send(&app, "POST", "/api/pipelines/missing/trigger").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", "/api/pipelines/missing/jobs").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", "/api/jobs/not-a-uuid").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", &format!("/api/jobs/{}", JobId::new())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
