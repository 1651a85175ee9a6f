//! Lifecycle events and event handling.
//!
//! Runs emit events as they start, finish, abort or get skipped, so that
//! embedding applications can observe the scheduler without polling job
//! records.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::types::{JobId, PipelineName};
use crate::core::window::TimeWindow;
use crate::repository::JobStatus;

/// Lifecycle events emitted by runs and the scheduler.
#[derive(Debug, Clone)]
pub enum Event {
    /// A job record was opened and the backend is about to be called.
    RunStarted {
        pipeline: PipelineName,
        job_id: JobId,
        window: TimeWindow,
        timestamp: Instant,
    },

    /// A run reached a terminal status.
    RunFinished {
        pipeline: PipelineName,
        job_id: JobId,
        status: JobStatus,
        message: String,
        duration: Duration,
        timestamp: Instant,
    },

    /// A run stopped before or after the backend call because the job
    /// record could not be written.
    RunAborted {
        pipeline: PipelineName,
        job_id: Option<JobId>,
        error: String,
        timestamp: Instant,
    },

    /// A scheduled fire was dropped because the previous run of the same
    /// pipeline is still in flight.
    FireSkipped {
        pipeline: PipelineName,
        timestamp: Instant,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::RunStarted { timestamp, .. } => *timestamp,
            Event::RunFinished { timestamp, .. } => *timestamp,
            Event::RunAborted { timestamp, .. } => *timestamp,
            Event::FireSkipped { timestamp, .. } => *timestamp,
        }
    }

    /// The pipeline the event concerns.
    pub fn pipeline(&self) -> &PipelineName {
        match self {
            Event::RunStarted { pipeline, .. }
            | Event::RunFinished { pipeline, .. }
            | Event::RunAborted { pipeline, .. }
            | Event::FireSkipped { pipeline, .. } => pipeline,
        }
    }

    /// Create a RunStarted event.
    pub fn run_started(pipeline: PipelineName, job_id: JobId, window: TimeWindow) -> Self {
        Event::RunStarted {
            pipeline,
            job_id,
            window,
            timestamp: Instant::now(),
        }
    }

    /// Create a RunFinished event.
    pub fn run_finished(
        pipeline: PipelineName,
        job_id: JobId,
        status: JobStatus,
        message: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Event::RunFinished {
            pipeline,
            job_id,
            status,
            message: message.into(),
            duration,
            timestamp: Instant::now(),
        }
    }

    /// Create a RunAborted event.
    pub fn run_aborted(
        pipeline: PipelineName,
        job_id: Option<JobId>,
        error: impl Into<String>,
    ) -> Self {
        Event::RunAborted {
            pipeline,
            job_id,
            error: error.into(),
            timestamp: Instant::now(),
        }
    }

    /// Create a FireSkipped event.
    pub fn fire_skipped(pipeline: PipelineName) -> Self {
        Event::FireSkipped {
            pipeline,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
