//! Statement execution backends.
//!
//! A backend runs one pipeline statement with the window parameters bound
//! and reports success or a failure message. Backends must be safe to call
//! concurrently for different pipelines.

mod dry_run;
mod mysql;
mod params;

pub use dry_run::DryRunBackend;
pub use mysql::MySqlBackend;
pub use params::{BoundStatement, bind_named};

use async_trait::async_trait;
use thiserror::Error;

use crate::core::window::WindowParams;

/// Errors reported by an execution backend.
///
/// The display text is what ends up in the job record, so variants that
/// wrap a driver message print it unchanged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    /// The data store rejected or failed the statement.
    #[error("{0}")]
    Statement(String),

    /// The data store could not be reached.
    #[error("{0}")]
    Connection(String),

    /// The statement references a parameter that is not bound.
    #[error("unknown parameter `:{0}` in statement")]
    UnknownParameter(String),
}

impl From<sqlx::Error> for ExecutionError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::Database(db) => ExecutionError::Statement(db.message().to_string()),
            e @ (sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed) => ExecutionError::Connection(e.to_string()),
            e => ExecutionError::Statement(e.to_string()),
        }
    }
}

/// What a successful execution reports back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    /// Rows written by the statement, when the backend knows.
    pub rows_affected: u64,
}

/// Executes a transformation statement for one window.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Run `statement` with `from`/`to` bound from `params`.
    async fn execute(
        &self,
        statement: &str,
        params: &WindowParams,
    ) -> Result<ExecutionStats, ExecutionError>;
}
