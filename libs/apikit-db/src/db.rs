//! `SQLite` connection handle and transaction helper.

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};

use crate::error::DbError;

/// Library-local result type for connection handling.
pub type Result<T> = std::result::Result<T, DbError>;

/// Pool knobs; unset values keep the sqlx defaults.
#[derive(Clone, Debug)]
pub struct ConnectOpts {
    /// Maximum number of connections in the pool.
    pub max_conns: Option<u32>,
    /// Minimum number of connections in the pool.
    pub min_conns: Option<u32>,
    /// Timeout to acquire a connection from the pool.
    pub acquire_timeout: Option<Duration>,
    /// Idle timeout before a connection is closed.
    pub idle_timeout: Option<Duration>,
    /// For file DSNs, create the database file if it is missing.
    pub create_if_missing: bool,
}

impl Default for ConnectOpts {
    fn default() -> Self {
        Self {
            max_conns: Some(10),
            min_conns: None,
            acquire_timeout: Some(Duration::from_secs(30)),
            idle_timeout: None,
            create_if_missing: true,
        }
    }
}

trait ApplyPoolOpts {
    fn apply(self, opts: &ConnectOpts) -> Self;
}

impl ApplyPoolOpts for SqlitePoolOptions {
    fn apply(mut self, opts: &ConnectOpts) -> Self {
        if let Some(n) = opts.max_conns {
            self = self.max_connections(n);
        }
        if let Some(n) = opts.min_conns {
            self = self.min_connections(n);
        }
        if let Some(t) = opts.acquire_timeout {
            self = self.acquire_timeout(t);
        }
        if let Some(t) = opts.idle_timeout {
            self = self.idle_timeout(t);
        }
        self
    }
}

/// Main handle.
#[derive(Debug, Clone)]
pub struct DbHandle {
    pool: SqlitePool,
    dsn: String,
}

impl DbHandle {
    /// Connect and build handle.
    ///
    /// Only `sqlite:` DSNs are accepted. Foreign keys are enforced on every connection.
    ///
    /// # Errors
    /// Returns `DbError::UnknownDsn` for other schemes, or the driver error if the
    /// connection fails.
    pub async fn connect(dsn: &str, opts: ConnectOpts) -> Result<Self> {
        let trimmed = dsn.trim_start();
        if !trimmed.starts_with("sqlite:") {
            return Err(DbError::UnknownDsn(dsn.to_owned()));
        }

        let connect_opts = SqliteConnectOptions::from_str(trimmed)?
            .create_if_missing(opts.create_if_missing)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .apply(&opts)
            .connect_with(connect_opts)
            .await?;

        tracing::debug!(dsn = trimmed, "database pool ready");
        Ok(Self {
            pool,
            dsn: trimmed.to_owned(),
        })
    }

    /// Graceful pool close.
    pub async fn close(self) {
        self.pool.close().await;
    }

    #[must_use]
    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Execute a closure within one transaction: commit on `Ok`, roll back on `Err`.
    ///
    /// # Errors
    /// Returns the closure's error, or the driver error if begin/commit fails.
    pub async fn with_tx<F, T, E>(&self, f: F) -> std::result::Result<T, E>
    where
        F: for<'a> FnOnce(
            &'a mut Transaction<'_, Sqlite>,
        ) -> Pin<Box<dyn Future<Output = std::result::Result<T, E>> + Send + 'a>>,
        E: From<sqlx::Error>,
    {
        let mut tx = self.pool.begin().await?;
        let res = f(&mut tx).await;
        match res {
            Ok(v) => {
                tx.commit().await?;
                Ok(v)
            }
            Err(e) => {
                // Best-effort rollback; keep the original error.
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "transaction rollback failed");
                }
                Err(e)
            }
        }
    }
}
