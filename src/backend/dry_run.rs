//! Backend that logs statements instead of executing them.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

use super::params::bind_named;
use super::{ExecutionBackend, ExecutionError, ExecutionStats};
use crate::core::window::WindowParams;

/// Binds parameters and logs the result without touching a data store.
///
/// Placeholder errors are still reported, so a dry run catches statements
/// that would fail to bind.
#[derive(Debug, Default)]
pub struct DryRunBackend {
    executions: AtomicU64,
}

impl DryRunBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of statements accepted so far.
    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionBackend for DryRunBackend {
    async fn execute(
        &self,
        statement: &str,
        params: &WindowParams,
    ) -> Result<ExecutionStats, ExecutionError> {
        let bound = bind_named(statement, params)?;
        tracing::info!(
            sql = %bound.sql,
            values = ?bound.values,
            "dry run: statement not executed"
        );
        self.executions.fetch_add(1, Ordering::SeqCst);
        Ok(ExecutionStats::default())
    }
}
