//! API request handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::core::types::{JobId, PipelineName};
use crate::repository::JobRepository;
use crate::scheduler::SchedulerHandle;

use super::errors::ApiError;
use super::responses::{
    HealthResponse, JobListResponse, JobResponse, MessageResponse, PipelineDetailResponse,
    PipelineListResponse, PipelineResponse, SchedulerStateResponse, TriggerResponse,
};

/// Shared application state for API handlers.
pub struct ApiState<R: JobRepository> {
    pub handle: SchedulerHandle,
    pub repository: Arc<R>,
}

impl<R: JobRepository> Clone for ApiState<R> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            repository: Arc::clone(&self.repository),
        }
    }
}

/// Query parameters for the job list endpoint.
#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

/// Get scheduler state.
pub async fn get_scheduler_state<R: JobRepository + 'static>(
    State(state): State<ApiState<R>>,
) -> Json<SchedulerStateResponse> {
    let scheduler_state = state.handle.state().await;
    let in_flight = state
        .handle
        .in_flight()
        .into_iter()
        .map(|name| name.to_string())
        .collect();
    Json(SchedulerStateResponse::new(scheduler_state, in_flight))
}

/// Pause the scheduler.
pub async fn pause_scheduler<R: JobRepository + 'static>(
    State(state): State<ApiState<R>>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.handle.pause().await?;
    Ok(Json(MessageResponse {
        message: "scheduler paused".to_string(),
    }))
}

/// Resume the scheduler.
pub async fn resume_scheduler<R: JobRepository + 'static>(
    State(state): State<ApiState<R>>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.handle.resume().await?;
    Ok(Json(MessageResponse {
        message: "scheduler resumed".to_string(),
    }))
}

/// List all pipelines.
pub async fn list_pipelines<R: JobRepository + 'static>(
    State(state): State<ApiState<R>>,
) -> Json<PipelineListResponse> {
    let pipelines: Vec<PipelineResponse> = state
        .handle
        .registry()
        .iter()
        .map(|definition| PipelineResponse::new(definition, &state.handle))
        .collect();
    let count = pipelines.len();
    Json(PipelineListResponse { pipelines, count })
}

/// Get a specific pipeline.
pub async fn get_pipeline<R: JobRepository + 'static>(
    State(state): State<ApiState<R>>,
    Path(name): Path<String>,
) -> Result<Json<PipelineDetailResponse>, ApiError> {
    let name = PipelineName::new(name);
    let definition = state
        .handle
        .registry()
        .get(&name)
        .ok_or_else(|| ApiError::NotFound(format!("pipeline not found: {}", name)))?;
    Ok(Json(PipelineDetailResponse::new(definition, &state.handle)))
}

/// Trigger a pipeline run.
///
/// Responds once the run has started; the outcome is visible through the
/// job endpoints.
pub async fn trigger_pipeline<R: JobRepository + 'static>(
    State(state): State<ApiState<R>>,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<TriggerResponse>), ApiError> {
    let ticket = state.handle.trigger(name.as_str()).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerResponse {
            pipeline: ticket.pipeline().to_string(),
            message: format!("pipeline '{}' triggered", name),
        }),
    ))
}

/// List jobs for a pipeline, most recent first.
pub async fn list_pipeline_jobs<R: JobRepository + 'static>(
    State(state): State<ApiState<R>>,
    Path(name): Path<String>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<JobListResponse>, ApiError> {
    let name = PipelineName::new(name);

    // Verify the pipeline exists
    if !state.handle.registry().contains(&name) {
        return Err(ApiError::NotFound(format!("pipeline not found: {}", name)));
    }

    let jobs = state.repository.list_jobs(&name, query.limit).await?;
    let jobs: Vec<JobResponse> = jobs.into_iter().map(JobResponse::from).collect();
    let count = jobs.len();
    Ok(Json(JobListResponse { jobs, count }))
}

/// Get a specific job.
pub async fn get_job<R: JobRepository + 'static>(
    State(state): State<ApiState<R>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job_id = JobId::parse(&job_id)
        .map_err(|_| ApiError::NotFound(format!("invalid job id: {}", job_id)))?;
    let job = state.repository.get_job(&job_id).await?;
    Ok(Json(JobResponse::from(job)))
}
