//! Testing utilities for users of the cadence library.
//!
//! This module provides doubles for driving runs deterministically:
//!
//! - [`ManualClock`]: A clock that only moves when told to
//! - [`ScriptedBackend`]: A backend with a fixed outcome that records calls
//! - [`GatedBackend`]: A backend that blocks until released
//! - [`UnavailableRepository`]: A repository whose every call fails
//! - [`PanickingRepository`]: A repository that panics for chosen pipelines
//! - [`RecordingHandler`]: An event handler that keeps every event

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{RwLock, watch};

use crate::backend::{ExecutionBackend, ExecutionError, ExecutionStats};
use crate::core::clock::Clock;
use crate::core::types::{JobId, PipelineName};
use crate::core::window::WindowParams;
use crate::events::{Event, EventHandler};
use crate::repository::{
    InMemoryJobRepository, JobCompletion, JobRepository, PipelineJob, RepositoryError,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A clock that returns a settable instant.
///
/// # Example
///
/// ```
/// use cadence::core::clock::Clock;
/// use cadence::testing::ManualClock;
/// use chrono::{TimeZone, Utc};
///
/// let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 2, 0, 59, 59).unwrap());
/// clock.advance(chrono::Duration::seconds(1));
/// assert_eq!(clock.now(), Utc.with_ymd_and_hms(2024, 3, 2, 1, 0, 0).unwrap());
/// ```
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Jump to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        *lock(&self.now) = now;
    }

    /// Move forward by `by`.
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = lock(&self.now);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

/// One call made to a test backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub statement: String,
    pub params: WindowParams,
}

#[derive(Debug, Clone)]
enum Script {
    Succeed(u64),
    Fail(ExecutionError),
    Panic(String),
}

/// A backend that always produces the same outcome.
///
/// # Example
///
/// ```
/// use cadence::backend::ExecutionError;
/// use cadence::testing::ScriptedBackend;
///
/// let backend = ScriptedBackend::failing(ExecutionError::Statement("syntax error".into()));
/// assert!(backend.calls().is_empty());
/// ```
#[derive(Debug)]
pub struct ScriptedBackend {
    script: Script,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedBackend {
    fn with_script(script: Script) -> Self {
        Self {
            script,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Succeed without touching any rows.
    pub fn succeeding() -> Self {
        Self::with_script(Script::Succeed(0))
    }

    /// Succeed reporting `rows` rows affected.
    pub fn succeeding_with_rows(rows: u64) -> Self {
        Self::with_script(Script::Succeed(rows))
    }

    /// Fail every call with `error`.
    pub fn failing(error: ExecutionError) -> Self {
        Self::with_script(Script::Fail(error))
    }

    /// Panic inside every call.
    pub fn panicking(message: impl Into<String>) -> Self {
        Self::with_script(Script::Panic(message.into()))
    }

    /// Calls received so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl ExecutionBackend for ScriptedBackend {
    async fn execute(
        &self,
        statement: &str,
        params: &WindowParams,
    ) -> Result<ExecutionStats, ExecutionError> {
        lock(&self.calls).push(RecordedCall {
            statement: statement.to_string(),
            params: params.clone(),
        });
        match &self.script {
            Script::Succeed(rows) => Ok(ExecutionStats {
                rows_affected: *rows,
            }),
            Script::Fail(error) => Err(error.clone()),
            Script::Panic(message) => panic!("{}", message),
        }
    }
}

/// A backend whose calls block until [`GatedBackend::release`] is called.
///
/// Used to hold a run in flight while a test fires the same pipeline again.
pub struct GatedBackend {
    gate: watch::Sender<bool>,
    held: Option<HashSet<String>>,
    entered: AtomicUsize,
    calls: Mutex<Vec<RecordedCall>>,
}

impl GatedBackend {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            gate,
            held: None,
            entered: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Block only calls for the given statements; others succeed at once.
    pub fn holding<I, S>(statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            held: Some(statements.into_iter().map(Into::into).collect()),
            ..Self::new()
        }
    }

    /// Calls received for `statement`.
    pub fn calls_for(&self, statement: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| call.statement == statement)
            .count()
    }

    /// Let every blocked and future call succeed.
    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    /// Number of calls that have reached the backend.
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    /// Calls received so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Wait until at least `count` calls have entered.
    ///
    /// # Panics
    ///
    /// Panics if `timeout` elapses first.
    pub async fn wait_entered(&self, count: usize, timeout: Duration) {
        let start = tokio::time::Instant::now();
        while self.entered() < count {
            if start.elapsed() > timeout {
                panic!(
                    "timed out waiting for {} backend call(s), saw {}",
                    count,
                    self.entered()
                );
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Default for GatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionBackend for GatedBackend {
    async fn execute(
        &self,
        statement: &str,
        params: &WindowParams,
    ) -> Result<ExecutionStats, ExecutionError> {
        lock(&self.calls).push(RecordedCall {
            statement: statement.to_string(),
            params: params.clone(),
        });
        let mut gate = self.gate.subscribe();
        self.entered.fetch_add(1, Ordering::SeqCst);
        if let Some(held) = &self.held {
            if !held.contains(statement) {
                return Ok(ExecutionStats::default());
            }
        }
        gate.wait_for(|open| *open)
            .await
            .map_err(|_| ExecutionError::Connection("gate dropped".to_string()))?;
        Ok(ExecutionStats::default())
    }
}

/// A repository that cannot be reached.
#[derive(Debug, Default)]
pub struct UnavailableRepository;

impl UnavailableRepository {
    pub fn new() -> Self {
        Self
    }

    fn error() -> RepositoryError {
        RepositoryError::Unavailable("connection refused".to_string())
    }
}

#[async_trait]
impl JobRepository for UnavailableRepository {
    async fn create_run(&self, _job: PipelineJob) -> Result<JobId, RepositoryError> {
        Err(Self::error())
    }

    async fn finish_run(
        &self,
        _id: &JobId,
        _completion: JobCompletion,
    ) -> Result<(), RepositoryError> {
        Err(Self::error())
    }

    async fn get_job(&self, _id: &JobId) -> Result<PipelineJob, RepositoryError> {
        Err(Self::error())
    }

    async fn list_jobs(
        &self,
        _pipeline: &PipelineName,
        _limit: usize,
    ) -> Result<Vec<PipelineJob>, RepositoryError> {
        Err(Self::error())
    }

    async fn list_running(&self) -> Result<Vec<PipelineJob>, RepositoryError> {
        Err(Self::error())
    }
}

/// An in-memory repository that panics when opening a job for one of the
/// given pipelines.
///
/// Simulates a defect escaping a run.
pub struct PanickingRepository {
    inner: InMemoryJobRepository,
    panics_for: HashSet<PipelineName>,
}

impl PanickingRepository {
    pub fn new<I, N>(pipelines: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<PipelineName>,
    {
        Self {
            inner: InMemoryJobRepository::new(),
            panics_for: pipelines.into_iter().map(Into::into).collect(),
        }
    }

    /// The repository holding the jobs of the other pipelines.
    pub fn inner(&self) -> &InMemoryJobRepository {
        &self.inner
    }
}

#[async_trait]
impl JobRepository for PanickingRepository {
    async fn create_run(&self, job: PipelineJob) -> Result<JobId, RepositoryError> {
        if self.panics_for.contains(&job.pipeline) {
            panic!("repository defect while opening job for {}", job.pipeline);
        }
        self.inner.create_run(job).await
    }

    async fn finish_run(
        &self,
        id: &JobId,
        completion: JobCompletion,
    ) -> Result<(), RepositoryError> {
        self.inner.finish_run(id, completion).await
    }

    async fn get_job(&self, id: &JobId) -> Result<PipelineJob, RepositoryError> {
        self.inner.get_job(id).await
    }

    async fn list_jobs(
        &self,
        pipeline: &PipelineName,
        limit: usize,
    ) -> Result<Vec<PipelineJob>, RepositoryError> {
        self.inner.list_jobs(pipeline, limit).await
    }

    async fn list_running(&self) -> Result<Vec<PipelineJob>, RepositoryError> {
        self.inner.list_running().await
    }
}

/// Event handler that keeps every event it receives.
#[derive(Default)]
pub struct RecordingHandler {
    events: RwLock<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far, in order.
    pub async fn events(&self) -> Vec<Event> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.write().await.push(event.clone());
    }
}
