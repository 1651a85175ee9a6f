//! HTTP API module for the cadence scheduler.
//!
//! Provides REST endpoints for inspecting pipelines and jobs, triggering
//! runs, and pausing or resuming the scheduler.

mod errors;
mod handlers;
mod responses;

pub use errors::ApiError;
pub use handlers::ApiState;
pub use responses::*;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ApiSettings;
use crate::repository::JobRepository;
use crate::scheduler::SchedulerHandle;

/// Build the API router with all endpoints.
pub fn build_router<R: JobRepository + 'static>(state: ApiState<R>) -> Router {
    Router::new()
        // Health check
        .route("/api/health", get(handlers::health))
        // Scheduler control
        .route(
            "/api/scheduler/state",
            get(handlers::get_scheduler_state::<R>),
        )
        .route("/api/scheduler/pause", post(handlers::pause_scheduler::<R>))
        .route(
            "/api/scheduler/resume",
            post(handlers::resume_scheduler::<R>),
        )
        // Pipelines
        .route("/api/pipelines", get(handlers::list_pipelines::<R>))
        .route("/api/pipelines/{name}", get(handlers::get_pipeline::<R>))
        .route(
            "/api/pipelines/{name}/trigger",
            post(handlers::trigger_pipeline::<R>),
        )
        .route(
            "/api/pipelines/{name}/jobs",
            get(handlers::list_pipeline_jobs::<R>),
        )
        // Jobs
        .route("/api/jobs/{job_id}", get(handlers::get_job::<R>))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Create the API state from scheduler components.
pub fn create_api_state<R: JobRepository>(
    handle: SchedulerHandle,
    repository: Arc<R>,
) -> ApiState<R> {
    ApiState { handle, repository }
}

/// Start the API server.
///
/// This function spawns the server and returns a handle to the task.
/// The server runs until the task is aborted or the process exits.
pub async fn start_server<R: JobRepository + 'static>(
    settings: &ApiSettings,
    state: ApiState<R>,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    let router = build_router(state);
    let listener = TcpListener::bind(settings.bind_address()).await?;
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "API server listening");

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    Ok(handle)
}
