//! Scheduler engine implementation.
//!
//! The scheduler is responsible for:
//! - Firing pipelines at their scheduled times
//! - Dropping fires of a pipeline whose previous run is still in flight
//! - Manual pipeline triggers
//! - Pause and resume functionality
//! - Containing failures that escape a run

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::backend::ExecutionBackend;
use crate::coordinator::{RunCoordinator, RunReport};
use crate::core::clock::Clock;
use crate::core::pipeline::{PipelineDefinition, PipelineRegistry};
use crate::core::schedule::{CronParser, SCHEDULE_TIMEZONE, ScheduleParser};
use crate::core::types::PipelineName;
use crate::core::window::WindowPolicy;
use crate::events::{Event, EventBus};
use crate::repository::JobRepository;

use super::guard::InFlightRuns;
use super::handle::{COMMAND_CHANNEL_BUFFER, RunTicket, SchedulerHandle};
use super::types::{ScheduledTrigger, SchedulerCommand, SchedulerError, SchedulerState};

/// Upper bound on occurrences counted between two ticks.
const MAX_COUNT_ITERATIONS: usize = 100;

type RunReply = oneshot::Receiver<Result<RunReport, SchedulerError>>;

/// The scheduler: owns the registry and one trigger per scheduled pipeline.
pub struct Scheduler<R: JobRepository> {
    registry: Arc<PipelineRegistry>,
    triggers: Arc<BTreeMap<PipelineName, ScheduledTrigger>>,
    coordinator: RunCoordinator<R>,
    parser: Arc<dyn ScheduleParser>,
    event_bus: Arc<EventBus>,
    in_flight: InFlightRuns,
    /// Tick interval for checking schedules.
    tick_interval: Duration,
    /// Graceful shutdown timeout (default: 30 seconds).
    shutdown_timeout: Duration,
    running_runs: RwLock<Vec<(PipelineName, JoinHandle<()>)>>,
}

impl<R: JobRepository + 'static> Scheduler<R> {
    /// Create a scheduler writing jobs to `repository` and running
    /// statements on `backend`.
    pub fn new(repository: Arc<R>, backend: Arc<dyn ExecutionBackend>) -> Self {
        let event_bus = Arc::new(EventBus::new());
        Self {
            registry: Arc::new(PipelineRegistry::new()),
            triggers: Arc::new(BTreeMap::new()),
            coordinator: RunCoordinator::new(repository, backend)
                .with_event_bus(Arc::clone(&event_bus)),
            parser: Arc::new(CronParser),
            event_bus,
            in_flight: InFlightRuns::new(),
            tick_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),
            running_runs: RwLock::new(Vec::new()),
        }
    }

    /// Read time from `clock` for schedules and windows.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.coordinator = self.coordinator.with_clock(clock);
        self
    }

    /// Set the event bus.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.coordinator = self.coordinator.with_event_bus(Arc::clone(&event_bus));
        self.event_bus = event_bus;
        self
    }

    /// Set the tick interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set the graceful shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Default window size for pipelines without their own.
    pub fn with_window_policy(mut self, policy: WindowPolicy) -> Self {
        self.coordinator = self.coordinator.with_window_policy(policy);
        self
    }

    /// Parser used for pipelines registered after this call.
    pub fn with_schedule_parser(mut self, parser: Arc<dyn ScheduleParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Register a pipeline.
    ///
    /// Pipelines with a schedule get a trigger; the others can only be run
    /// manually.
    pub fn register(
        &mut self,
        definition: impl Into<Arc<PipelineDefinition>>,
    ) -> Result<(), SchedulerError> {
        let definition = definition.into();
        let name = definition.name().clone();
        if self.registry.contains(&name) {
            return Err(SchedulerError::DuplicatePipeline(name));
        }

        let trigger = match definition.schedule() {
            Some(expression) => {
                let schedule = self
                    .parser
                    .parse(expression, SCHEDULE_TIMEZONE)
                    .map_err(|source| SchedulerError::InvalidSchedule {
                        pipeline: name.clone(),
                        source,
                    })?;
                Some(ScheduledTrigger::new(
                    name.clone(),
                    schedule,
                    SCHEDULE_TIMEZONE,
                ))
            }
            None => None,
        };

        Arc::make_mut(&mut self.registry)
            .insert(definition)
            .map_err(|_| SchedulerError::DuplicatePipeline(name.clone()))?;

        match trigger {
            Some(trigger) => {
                tracing::info!(
                    pipeline = %name,
                    schedule = trigger.expression(),
                    timezone = %trigger.timezone(),
                    prevent_overrun = trigger.prevent_overrun(),
                    "registered trigger"
                );
                Arc::make_mut(&mut self.triggers).insert(name, trigger);
            }
            None => tracing::info!(pipeline = %name, "registered pipeline without schedule"),
        }
        Ok(())
    }

    /// Register every pipeline of `registry`, returning how many were added.
    pub fn register_all(&mut self, registry: &PipelineRegistry) -> Result<usize, SchedulerError> {
        for definition in registry.iter() {
            self.register(Arc::clone(definition))?;
        }
        Ok(registry.len())
    }

    /// The registered pipelines.
    pub fn registry(&self) -> &PipelineRegistry {
        &self.registry
    }

    /// Triggers of the scheduled pipelines, by name.
    pub fn triggers(&self) -> impl Iterator<Item = &ScheduledTrigger> {
        self.triggers.values()
    }

    /// Get the event bus.
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Start the scheduler and return a handle for controlling it.
    pub async fn start(self) -> (SchedulerHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let state = Arc::new(RwLock::new(SchedulerState::Running));

        let handle = SchedulerHandle {
            command_tx,
            state: Arc::clone(&state),
            registry: Arc::clone(&self.registry),
            triggers: Arc::clone(&self.triggers),
            in_flight: self.in_flight.clone(),
            clock: Arc::clone(self.coordinator.clock()),
        };

        tracing::info!(
            pipelines = self.registry.len(),
            triggers = self.triggers.len(),
            "scheduler started"
        );

        // Occurrences are counted from here, not from when the task first runs
        let started_at = self.coordinator.clock().now();
        let scheduler_task = tokio::spawn(async move {
            self.run(command_rx, state, started_at).await;
        });

        (handle, scheduler_task)
    }

    /// Main scheduler loop.
    async fn run(
        self,
        mut command_rx: mpsc::Receiver<SchedulerCommand>,
        state: Arc<RwLock<SchedulerState>>,
        started_at: DateTime<Utc>,
    ) {
        let mut interval = tokio::time::interval(self.tick_interval);
        let mut last_check = started_at;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let current_state = *state.read().await;
                    if current_state == SchedulerState::Running {
                        let now = self.coordinator.clock().now();
                        self.check_schedules(last_check, now).await;
                        last_check = now;
                    }

                    self.cleanup_finished_runs().await;
                }

                Some(command) = command_rx.recv() => {
                    match command {
                        SchedulerCommand::Trigger { pipeline, response } => {
                            let result = self
                                .launch(&pipeline)
                                .await
                                .map(|reply| RunTicket::new(pipeline.clone(), reply));
                            match &result {
                                Ok(_) => tracing::info!(pipeline = %pipeline, "manual trigger accepted"),
                                Err(e) => tracing::warn!(pipeline = %pipeline, error = %e, "manual trigger rejected"),
                            }
                            let _ = response.send(result);
                        }
                        SchedulerCommand::Pause { response } => {
                            let mut s = state.write().await;
                            *s = SchedulerState::Paused;
                            tracing::info!("scheduler paused");
                            let _ = response.send(());
                        }
                        SchedulerCommand::Resume { response } => {
                            let mut s = state.write().await;
                            *s = SchedulerState::Running;
                            // Occurrences that elapsed while paused are skipped
                            last_check = self.coordinator.clock().now();
                            tracing::info!("scheduler resumed, skipping any fires that elapsed during pause");
                            let _ = response.send(());
                        }
                        SchedulerCommand::Shutdown { response } => {
                            let mut s = state.write().await;
                            *s = SchedulerState::Stopped;
                            drop(s);

                            self.await_running_runs().await;

                            let _ = response.send(());
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Fire every trigger with an occurrence in `(last_check, now]`.
    ///
    /// Several elapsed occurrences of the same trigger collapse into a single
    /// fire.
    async fn check_schedules(&self, last_check: DateTime<Utc>, now: DateTime<Utc>) {
        for trigger in self.triggers.values() {
            let pipeline = trigger.pipeline();

            let mut occurrence_count = 0;
            let mut current_time = last_check;
            while occurrence_count < MAX_COUNT_ITERATIONS {
                match trigger.next_after(current_time) {
                    Ok(next) if next <= now => {
                        occurrence_count += 1;
                        current_time = next;
                    }
                    _ => break,
                }
            }

            if occurrence_count == 0 {
                continue;
            }

            if occurrence_count >= MAX_COUNT_ITERATIONS {
                tracing::warn!(
                    pipeline = %pipeline,
                    last_check = %last_check,
                    now = %now,
                    missed_occurrences = format!("{}+", occurrence_count),
                    "many scheduled occurrences missed, firing once"
                );
            } else if occurrence_count > 1 {
                tracing::warn!(
                    pipeline = %pipeline,
                    last_check = %last_check,
                    now = %now,
                    missed_occurrences = occurrence_count,
                    "multiple scheduled occurrences missed, firing once"
                );
            }

            match self.launch(pipeline).await {
                Ok(_) => tracing::info!(pipeline = %pipeline, fired_at = %now, "scheduled fire"),
                Err(SchedulerError::AlreadyRunning(_)) => {
                    tracing::warn!(
                        pipeline = %pipeline,
                        fired_at = %now,
                        "skipping scheduled fire: previous run still in flight"
                    );
                    self.event_bus
                        .emit(Event::fire_skipped(pipeline.clone()))
                        .await;
                }
                Err(e) => {
                    tracing::warn!(pipeline = %pipeline, error = %e, "failed to fire scheduled pipeline");
                }
            }
        }
    }

    /// Start a run of `pipeline` unless one is already in flight.
    ///
    /// The run executes on its own task; anything escaping the coordinator
    /// is reported as a scheduler defect and never reaches this loop.
    async fn launch(&self, pipeline: &PipelineName) -> Result<RunReply, SchedulerError> {
        let definition = self
            .registry
            .get(pipeline)
            .cloned()
            .ok_or_else(|| SchedulerError::PipelineNotFound(pipeline.clone()))?;
        let guard = self
            .in_flight
            .try_acquire(pipeline)
            .ok_or_else(|| SchedulerError::AlreadyRunning(pipeline.clone()))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let coordinator = self.coordinator.clone();
        let name = pipeline.clone();

        let task = tokio::spawn(async move {
            let run = tokio::spawn(async move { coordinator.execute(&definition).await });
            let result = match run.await {
                Ok(Ok(report)) => Ok(report),
                Ok(Err(e)) => Err(SchedulerError::RunAborted(e.to_string())),
                Err(join_error) => {
                    tracing::error!(
                        pipeline = %name,
                        error = %join_error,
                        "scheduler defect: run task failed"
                    );
                    Err(SchedulerError::RunAborted(format!(
                        "scheduler defect: {}",
                        join_error
                    )))
                }
            };
            // Release before replying so a waiter can immediately run again
            drop(guard);
            let _ = reply_tx.send(result);
        });

        self.running_runs
            .write()
            .await
            .push((pipeline.clone(), task));
        Ok(reply_rx)
    }

    /// Clean up finished run handles.
    async fn cleanup_finished_runs(&self) {
        let mut running = self.running_runs.write().await;
        running.retain(|(_, handle)| !handle.is_finished());
    }

    /// Wait for all in-flight runs to complete with a timeout.
    async fn await_running_runs(&self) {
        let running_count = self.running_runs.read().await.len();

        if running_count == 0 {
            tracing::info!("no in-flight runs to wait for during shutdown");
            return;
        }

        tracing::info!(
            in_flight = running_count,
            timeout = ?self.shutdown_timeout,
            "graceful shutdown: waiting for in-flight runs"
        );

        let start = tokio::time::Instant::now();
        let deadline = start + self.shutdown_timeout;

        loop {
            let mut running = self.running_runs.write().await;
            running.retain(|(_, handle)| !handle.is_finished());
            let remaining: Vec<String> = running
                .iter()
                .map(|(name, _)| name.as_str().to_string())
                .collect();
            drop(running);

            if remaining.is_empty() {
                tracing::info!(elapsed = ?start.elapsed(), "all in-flight runs completed");
                break;
            }

            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    timeout = ?self.shutdown_timeout,
                    abandoned = ?remaining,
                    "graceful shutdown timeout exceeded, abandoning in-flight runs"
                );
                break;
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
