//! Per-pipeline overrun prevention.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::core::types::PipelineName;

/// Set of pipelines with a run in flight.
///
/// This is the only mutual exclusion between runs: distinct pipelines never
/// block each other.
#[derive(Debug, Clone, Default)]
pub struct InFlightRuns {
    inner: Arc<Mutex<HashSet<PipelineName>>>,
}

impl InFlightRuns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `pipeline` as in flight, or `None` if it already is.
    pub fn try_acquire(&self, pipeline: &PipelineName) -> Option<InFlightGuard> {
        if !self.lock().insert(pipeline.clone()) {
            return None;
        }
        Some(InFlightGuard {
            runs: self.clone(),
            pipeline: pipeline.clone(),
        })
    }

    pub fn is_in_flight(&self, pipeline: &PipelineName) -> bool {
        self.lock().contains(pipeline)
    }

    /// Pipelines currently in flight, sorted by name.
    pub fn snapshot(&self) -> Vec<PipelineName> {
        let mut names: Vec<_> = self.lock().iter().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A panic while holding the lock cannot leave the set half-updated
    fn lock(&self) -> MutexGuard<'_, HashSet<PipelineName>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the in-flight flag when dropped, including during unwinding.
#[derive(Debug)]
pub struct InFlightGuard {
    runs: InFlightRuns,
    pipeline: PipelineName,
}

impl InFlightGuard {
    pub fn pipeline(&self) -> &PipelineName {
        &self.pipeline
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.runs.lock().remove(&self.pipeline);
    }
}
