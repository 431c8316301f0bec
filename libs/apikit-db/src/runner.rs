//! Statement execution seam.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqliteQueryResult};
use sqlx::{Executor, Sqlite};

use crate::db::DbHandle;
use crate::error::ApiResult;
use crate::value::{Row, Statement, bind_params, decode_row};

/// Executes rendered read statements.
#[async_trait]
pub trait QueryRunner: Send + Sync {
    async fn fetch_all(&self, stmt: &Statement) -> ApiResult<Vec<Row>>;
}

/// Run a statement on any `SQLite` executor (pool, connection or transaction).
///
/// # Errors
/// Returns the driver error.
pub async fn fetch_rows<'c, E>(executor: E, stmt: &Statement) -> Result<Vec<Row>, sqlx::Error>
where
    E: Executor<'c, Database = Sqlite>,
{
    let rows = bind_params(&stmt.sql, &stmt.params)
        .fetch_all(executor)
        .await?;
    rows.iter().map(decode_row).collect()
}

/// Execute a statement that returns no rows.
///
/// # Errors
/// Returns the driver error.
pub async fn execute<'c, E>(executor: E, stmt: &Statement) -> Result<SqliteQueryResult, sqlx::Error>
where
    E: Executor<'c, Database = Sqlite>,
{
    bind_params(&stmt.sql, &stmt.params).execute(executor).await
}

/// Pool-backed runner.
#[derive(Debug, Clone)]
pub struct SqliteRunner {
    pool: SqlitePool,
    log_statements: bool,
}

impl SqliteRunner {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            log_statements: false,
        }
    }

    #[must_use]
    pub fn from_handle(db: &DbHandle) -> Self {
        Self::new(db.pool().clone())
    }

    /// Log every statement at info instead of debug.
    #[must_use]
    pub fn with_statement_logging(mut self, enabled: bool) -> Self {
        self.log_statements = enabled;
        self
    }
}

#[async_trait]
impl QueryRunner for SqliteRunner {
    async fn fetch_all(&self, stmt: &Statement) -> ApiResult<Vec<Row>> {
        if self.log_statements {
            tracing::info!(sql = %stmt, "query");
        } else {
            tracing::debug!(sql = %stmt, "query");
        }
        let rows = fetch_rows(&self.pool, stmt).await.inspect_err(|e| {
            tracing::error!(error = %e, sql = %stmt.sql, "query failed");
        })?;
        Ok(rows)
    }
}

#[async_trait]
impl<R: QueryRunner + ?Sized> QueryRunner for Arc<R> {
    async fn fetch_all(&self, stmt: &Statement) -> ApiResult<Vec<Row>> {
        (**self).fetch_all(stmt).await
    }
}

/// Wraps a runner and records every statement it executes.
#[cfg(any(test, feature = "test-support"))]
#[derive(Debug)]
pub struct RecordingRunner<R> {
    inner: R,
    statements: std::sync::Mutex<Vec<Statement>>,
}

#[cfg(any(test, feature = "test-support"))]
impl<R> RecordingRunner<R> {
    #[must_use]
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            statements: std::sync::Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn statements(&self) -> Vec<Statement> {
        self.lock().clone()
    }

    pub fn reset(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Statement>> {
        self.statements
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl<R: QueryRunner> QueryRunner for RecordingRunner<R> {
    async fn fetch_all(&self, stmt: &Statement) -> ApiResult<Vec<Row>> {
        self.lock().push(stmt.clone());
        self.inner.fetch_all(stmt).await
    }
}
