//! In-memory job repository.
//!
//! Provides a thread-safe backend for testing and development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{
    JobCompletion, JobRepository, JobStatus, PipelineJob, RepositoryError, is_same_open_job,
};
use crate::core::types::{JobId, PipelineName};

/// In-memory job repository.
///
/// Thread-safe storage using RwLock for concurrent access.
/// Data is not persisted across restarts.
pub struct InMemoryJobRepository {
    jobs: RwLock<HashMap<JobId, PipelineJob>>,
}

impl InMemoryJobRepository {
    /// Create a new empty repository.
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored jobs.
    pub fn len(&self) -> usize {
        self.jobs.read().map(|jobs| jobs.len()).unwrap_or(0)
    }

    /// Whether no jobs are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryJobRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create_run(&self, job: PipelineJob) -> Result<JobId, RepositoryError> {
        let mut jobs = self.jobs.write().map_err(|_| RepositoryError::LockPoisoned)?;
        if let Some(existing) = jobs.get(&job.id) {
            if is_same_open_job(existing, &job) {
                return Ok(job.id);
            }
            return Err(RepositoryError::DuplicateKey(format!("job: {}", job.id)));
        }
        if job.status != JobStatus::Running {
            return Err(RepositoryError::InvalidTransition {
                id: job.id,
                from: JobStatus::Running,
                to: job.status,
            });
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    async fn finish_run(
        &self,
        id: &JobId,
        completion: JobCompletion,
    ) -> Result<(), RepositoryError> {
        let mut jobs = self.jobs.write().map_err(|_| RepositoryError::LockPoisoned)?;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(format!("job: {}", id)))?;
        job.finish(&completion)
    }

    async fn get_job(&self, id: &JobId) -> Result<PipelineJob, RepositoryError> {
        let jobs = self.jobs.read().map_err(|_| RepositoryError::LockPoisoned)?;
        jobs.get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("job: {}", id)))
    }

    async fn list_jobs(
        &self,
        pipeline: &PipelineName,
        limit: usize,
    ) -> Result<Vec<PipelineJob>, RepositoryError> {
        let jobs = self.jobs.read().map_err(|_| RepositoryError::LockPoisoned)?;
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| &j.pipeline == pipeline)
            .cloned()
            .collect();
        // Most recent first; ids are time-ordered so they break ties
        result.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.as_uuid().cmp(a.id.as_uuid()))
        });
        result.truncate(limit);
        Ok(result)
    }

    async fn list_running(&self) -> Result<Vec<PipelineJob>, RepositoryError> {
        let jobs = self.jobs.read().map_err(|_| RepositoryError::LockPoisoned)?;
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Running)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(result)
    }
}
