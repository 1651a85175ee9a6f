//! MySQL execution backend.

use async_trait::async_trait;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};

use super::params::bind_named;
use super::{ExecutionBackend, ExecutionError, ExecutionStats};
use crate::core::window::WindowParams;

/// Executes statements against a pooled MySQL connection.
///
/// Each execution checks out one connection, so different pipelines run in
/// parallel up to the pool size.
#[derive(Debug, Clone)]
pub struct MySqlBackend {
    pool: MySqlPool,
}

impl MySqlBackend {
    /// Connect to `url`, failing if the server is unreachable.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, ExecutionError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Build a pool that connects on first use.
    pub fn connect_lazy(url: &str, max_connections: u32) -> Result<Self, ExecutionError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(url)?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl ExecutionBackend for MySqlBackend {
    async fn execute(
        &self,
        statement: &str,
        params: &WindowParams,
    ) -> Result<ExecutionStats, ExecutionError> {
        let bound = bind_named(statement, params)?;

        let mut query = sqlx::query(&bound.sql);
        for value in &bound.values {
            query = query.bind(value.as_str());
        }

        let result = query.execute(&self.pool).await?;
        Ok(ExecutionStats {
            rows_affected: result.rows_affected(),
        })
    }
}
