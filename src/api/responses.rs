//! API response types.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::pipeline::PipelineDefinition;
use crate::repository::PipelineJob;
use crate::scheduler::{SchedulerHandle, SchedulerState};

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Scheduler state response.
#[derive(Debug, Serialize)]
pub struct SchedulerStateResponse {
    pub state: SchedulerState,
    pub is_running: bool,
    pub is_paused: bool,
    /// Pipelines with a run in flight.
    pub in_flight: Vec<String>,
}

impl SchedulerStateResponse {
    pub fn new(state: SchedulerState, in_flight: Vec<String>) -> Self {
        Self {
            state,
            is_running: state == SchedulerState::Running,
            is_paused: state == SchedulerState::Paused,
            in_flight,
        }
    }
}

/// Pipeline summary for list responses.
#[derive(Debug, Serialize)]
pub struct PipelineResponse {
    pub name: String,
    pub schedule: Option<String>,
    pub timezone: Option<String>,
    pub next_fire: Option<DateTime<Utc>>,
    pub window_days: Option<u32>,
    pub in_flight: bool,
}

impl PipelineResponse {
    pub fn new(definition: &PipelineDefinition, handle: &SchedulerHandle) -> Self {
        let name = definition.name();
        let trigger = handle.trigger_for(name);
        Self {
            name: name.to_string(),
            schedule: definition.schedule().map(str::to_string),
            timezone: trigger.map(|t| t.timezone().to_string()),
            next_fire: handle.next_fire(name),
            window_days: definition.window().map(|w| w.size_days()),
            in_flight: handle.is_in_flight(name),
        }
    }
}

/// Full pipeline definition.
#[derive(Debug, Serialize)]
pub struct PipelineDetailResponse {
    #[serde(flatten)]
    pub summary: PipelineResponse,
    pub statement: String,
    pub options: Map<String, Value>,
}

impl PipelineDetailResponse {
    pub fn new(definition: &PipelineDefinition, handle: &SchedulerHandle) -> Self {
        Self {
            summary: PipelineResponse::new(definition, handle),
            statement: definition.statement().to_string(),
            options: definition.options().clone(),
        }
    }
}

/// List of pipelines response.
#[derive(Debug, Serialize)]
pub struct PipelineListResponse {
    pub pipelines: Vec<PipelineResponse>,
    pub count: usize,
}

/// Trigger response.
#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub pipeline: String,
    pub message: String,
}

/// Job record response.
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: String,
    pub pipeline: String,
    pub status: String,
    pub window_from: DateTime<Utc>,
    pub window_to: DateTime<Utc>,
    pub message: Option<String>,
    pub duration_secs: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<PipelineJob> for JobResponse {
    fn from(job: PipelineJob) -> Self {
        Self {
            id: job.id.to_string(),
            pipeline: job.pipeline.to_string(),
            status: job.status.as_str().to_string(),
            window_from: job.window_from,
            window_to: job.window_to,
            message: job.message,
            duration_secs: job.duration_secs,
            created_at: job.created_at,
            finished_at: job.finished_at,
        }
    }
}

/// List of jobs response.
#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobResponse>,
    pub count: usize,
}

/// Simple message response.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}
