//! Connection pool management.
//!
//! One bounded pool per process, using the database-specific sqlx pools
//! (PgPool, SqlitePool) for full type support. Sessions are opened read-only
//! and, on PostgreSQL, with a server-side `statement_timeout`. Every
//! connection is pinged before it is handed out.
//!
//! Statements borrow connections through a [`ConnectionLease`], which returns
//! the connection on success and discards it when the session state is
//! suspect: after a timeout, a transport failure, or when the lease is
//! dropped mid-statement.

use crate::error::{GateError, GateResult, StartupError};
use crate::models::{DatabaseType, masked_connection_string};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Database, PgPool, Pool, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pool sizing and session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long a caller waits for a free connection before PoolExhausted
    pub acquire_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    /// Server-side statement deadline (PostgreSQL only)
    pub statement_timeout: Option<Duration>,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 0,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Some(Duration::from_secs(600)),
            statement_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Open a pool for `connection_string`, verifying connectivity once.
    pub async fn connect(
        connection_string: &str,
        settings: &PoolSettings,
    ) -> Result<Self, StartupError> {
        let db_type = DatabaseType::from_connection_string(connection_string).ok_or_else(|| {
            StartupError::UnsupportedScheme {
                scheme: connection_string
                    .split(':')
                    .next()
                    .unwrap_or_default()
                    .to_string(),
            }
        })?;
        let target = masked_connection_string(connection_string);

        info!(
            url = %target,
            db_type = %db_type,
            max_connections = settings.max_connections,
            "Connecting to database"
        );

        let connect_error = |e: sqlx::Error| StartupError::Connect {
            target: target.clone(),
            message: e.to_string(),
        };

        let pool = match db_type {
            DatabaseType::PostgreSQL => {
                let mut options =
                    PgConnectOptions::from_str(connection_string).map_err(connect_error)?;
                options = options.options([("default_transaction_read_only", "on")]);
                if let Some(deadline) = settings.statement_timeout {
                    options = options
                        .options([("statement_timeout", deadline.as_millis().to_string())]);
                }

                let pool = PgPoolOptions::new()
                    .min_connections(settings.min_connections)
                    .max_connections(settings.max_connections)
                    .acquire_timeout(settings.acquire_timeout)
                    .idle_timeout(settings.idle_timeout)
                    .test_before_acquire(true)
                    .connect_with(options)
                    .await
                    .map_err(connect_error)?;
                DbPool::Postgres(pool)
            }
            DatabaseType::SQLite => {
                let options = SqliteConnectOptions::from_str(connection_string)
                    .map_err(connect_error)?
                    .read_only(true);

                let pool = SqlitePoolOptions::new()
                    .min_connections(settings.min_connections)
                    .max_connections(settings.max_connections)
                    .acquire_timeout(settings.acquire_timeout)
                    .idle_timeout(settings.idle_timeout)
                    .test_before_acquire(true)
                    .connect_with(options)
                    .await
                    .map_err(connect_error)?;
                DbPool::SQLite(pool)
            }
        };

        match pool.server_version().await {
            Ok(version) => info!(url = %target, version = %version, "Connected to database"),
            Err(e) => {
                pool.close().await;
                return Err(connect_error(e));
            }
        }

        Ok(pool)
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        match self {
            DbPool::Postgres(pool) => pool.close().await,
            DbPool::SQLite(pool) => pool.close().await,
        }
    }

    /// Get the database type for this pool.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbPool::Postgres(_) => DatabaseType::PostgreSQL,
            DbPool::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Connections currently open, idle or leased.
    pub fn size(&self) -> u32 {
        match self {
            DbPool::Postgres(pool) => pool.size(),
            DbPool::SQLite(pool) => pool.size(),
        }
    }

    pub fn num_idle(&self) -> usize {
        match self {
            DbPool::Postgres(pool) => pool.num_idle(),
            DbPool::SQLite(pool) => pool.num_idle(),
        }
    }

    async fn server_version(&self) -> Result<String, sqlx::Error> {
        match self {
            DbPool::Postgres(pool) => {
                sqlx::query_scalar::<_, String>("SELECT version()")
                    .fetch_one(pool)
                    .await
            }
            DbPool::SQLite(pool) => {
                sqlx::query_scalar::<_, String>("SELECT sqlite_version()")
                    .fetch_one(pool)
                    .await
            }
        }
    }
}

/// RAII lease over one pooled connection.
///
/// Call [`release`](Self::release) once the statement finished cleanly, or
/// [`discard`](Self::discard) when the session may still be busy or broken.
/// A lease dropped without either (the statement future was cancelled) is
/// discarded, so a connection with an in-flight statement never returns to
/// the pool.
pub struct ConnectionLease<DB: Database> {
    conn: Option<PoolConnection<DB>>,
}

impl<DB: Database> std::fmt::Debug for ConnectionLease<DB> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLease")
            .field("settled", &self.conn.is_none())
            .finish_non_exhaustive()
    }
}

impl<DB: Database> ConnectionLease<DB> {
    /// Wait up to the pool's acquire timeout for a connection.
    pub async fn acquire(pool: &Pool<DB>) -> Result<Self, sqlx::Error> {
        let conn = pool.acquire().await?;
        Ok(Self { conn: Some(conn) })
    }

    /// Borrow the leased connection.
    pub fn connection(&mut self) -> GateResult<&mut DB::Connection> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| GateError::backend("connection lease already settled"))
    }

    /// Return the connection to the pool.
    pub fn release(mut self) {
        drop(self.conn.take());
    }

    /// Close the connection instead of returning it; the pool opens a
    /// replacement on demand.
    pub fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            debug!("Discarding pooled connection");
            drop(conn.detach());
        }
    }

    /// Release after a driver error, discarding unless the database itself
    /// reported the error on an otherwise healthy session.
    pub fn settle_after(self, err: &sqlx::Error) {
        match err {
            sqlx::Error::Database(_) | sqlx::Error::ColumnDecode { .. } => self.release(),
            _ => self.discard(),
        }
    }
}

impl<DB: Database> Drop for ConnectionLease<DB> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!("Connection lease dropped mid-statement; discarding connection");
            drop(conn.detach());
        }
    }
}
