//! Query execution engine.
//!
//! The executor owns every use of a pooled connection: acquire, bind, run,
//! collect, release. Values are always bound, never interpolated. Rows are
//! read from the stream only up to the effective limit, and each statement
//! runs under a deadline.
//!
//! # Architecture
//!
//! Backend-specific code lives in the `postgres` and `sqlite` submodules and
//! is kept deliberately parallel. The shared lease/deadline/settle sequence is
//! expanded by the `with_lease!` macro in both.

use crate::db::params::{self, BoundStatement};
use crate::db::pool::DbPool;
use crate::error::{GateError, GateResult};
use crate::models::{DatabaseType, GuardedStatement, QueryLimit, QueryResult, SqlParams};
use serde_json::Value as JsonValue;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Per-statement execution settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorSettings {
    /// Deadline for a single statement, pre-flight probe or real run
    pub statement_timeout: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            statement_timeout: Duration::from_secs(30),
        }
    }
}

/// Rows collected from one statement.
#[derive(Debug, Default)]
struct FetchedRows {
    columns: Vec<String>,
    rows: Vec<Vec<JsonValue>>,
}

/// Why a leased run failed, before it is mapped into the taxonomy. The
/// probe and the real run map driver failures differently.
#[derive(Debug)]
pub(crate) enum RunError {
    Gate(GateError),
    Driver(sqlx::Error),
    Timeout(Duration),
}

impl RunError {
    fn into_execution_error(self) -> GateError {
        match self {
            RunError::Gate(err) => err,
            RunError::Driver(err) => GateError::from_execution(err),
            RunError::Timeout(deadline) => GateError::timeout("statement", deadline),
        }
    }

    fn into_probe_error(self) -> GateError {
        match self {
            RunError::Gate(err) => err,
            RunError::Driver(err) => GateError::from_probe(err),
            RunError::Timeout(deadline) => GateError::timeout("pre-flight probe", deadline),
        }
    }
}

/// Acquire a lease, run `$body` against the leased connection under
/// `$deadline`, then release or discard the connection according to how the
/// body finished.
macro_rules! with_lease {
    ($pool:expr, $deadline:expr, |$conn:ident| $body:expr) => {{
        let deadline: Duration = $deadline;
        let mut lease = ConnectionLease::acquire($pool)
            .await
            .map_err(RunError::Driver)?;
        let outcome = {
            let $conn = lease.connection().map_err(RunError::Gate)?;
            tokio::time::timeout(deadline, $body).await
        };
        match outcome {
            Ok(Ok(value)) => {
                lease.release();
                Ok(value)
            }
            Ok(Err(err)) => {
                lease.settle_after(&err);
                Err(RunError::Driver(err))
            }
            Err(_) => {
                warn!(
                    deadline_ms = deadline.as_millis() as u64,
                    "Statement deadline elapsed; discarding connection"
                );
                lease.discard();
                Err(RunError::Timeout(deadline))
            }
        }
    }};
}

/// Query executor bound to the process-wide pool.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    pool: DbPool,
    settings: ExecutorSettings,
}

impl QueryExecutor {
    pub fn new(pool: DbPool, settings: ExecutorSettings) -> Self {
        Self { pool, settings }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn db_type(&self) -> DatabaseType {
        self.pool.db_type()
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Execute a guarded statement, reading at most `limit` rows.
    ///
    /// `limit_reached` in the result tells "exactly N rows exist" apart from
    /// "N rows returned, more may exist".
    pub async fn execute(
        &self,
        guarded: &GuardedStatement,
        limit: QueryLimit,
    ) -> GateResult<QueryResult> {
        let start = Instant::now();
        let bound = params::resolve(guarded.sql(), guarded.params(), self.db_type())?;
        let max_rows = limit.get() as usize;

        debug!(
            params = bound.values.len(),
            limit = limit.get(),
            timeout_ms = self.settings.statement_timeout.as_millis() as u64,
            "Executing statement"
        );

        let fetched = self
            .fetch(&bound, max_rows)
            .await
            .map_err(RunError::into_execution_error)
            .inspect_err(|e| warn!(kind = %e.kind, error = %e.message, "Statement failed"))?;

        let row_count = fetched.rows.len();
        Ok(QueryResult {
            columns: fetched.columns,
            rows: fetched.rows,
            limit: limit.get(),
            limit_reached: row_count >= max_rows,
            execution_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Run `sql` for its errors only; rows, if any, are discarded.
    pub(crate) async fn probe(&self, sql: &str, params: &SqlParams) -> GateResult<()> {
        let bound = params::resolve(sql, params, self.db_type())?;
        let deadline = self.settings.statement_timeout;
        let outcome = match &self.pool {
            DbPool::Postgres(pool) => postgres::probe(pool, &bound, deadline).await,
            DbPool::SQLite(pool) => sqlite::probe(pool, &bound, deadline).await,
        };
        outcome.map_err(RunError::into_probe_error)
    }

    async fn fetch(&self, bound: &BoundStatement, max_rows: usize) -> Result<FetchedRows, RunError> {
        let deadline = self.settings.statement_timeout;
        match &self.pool {
            DbPool::Postgres(pool) => postgres::fetch(pool, bound, max_rows, deadline).await,
            DbPool::SQLite(pool) => sqlite::fetch(pool, bound, max_rows, deadline).await,
        }
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================

mod postgres {
    use super::*;
    use crate::db::params::bind_postgres_param;
    use crate::db::pool::ConnectionLease;
    use crate::db::types::RowValues;
    use futures_util::{StreamExt, TryStreamExt};
    use sqlx::postgres::{PgConnection, PgRow};
    use sqlx::{Column, Executor, PgPool, Statement};

    pub async fn fetch(
        pool: &PgPool,
        bound: &BoundStatement,
        max_rows: usize,
        deadline: Duration,
    ) -> Result<FetchedRows, RunError> {
        with_lease!(pool, deadline, |conn| fetch_rows(conn, bound, max_rows))
    }

    pub async fn probe(
        pool: &PgPool,
        bound: &BoundStatement,
        deadline: Duration,
    ) -> Result<(), RunError> {
        with_lease!(pool, deadline, |conn| probe_rows(conn, bound))
    }

    async fn fetch_rows(
        conn: &mut PgConnection,
        bound: &BoundStatement,
        max_rows: usize,
    ) -> Result<FetchedRows, sqlx::Error> {
        let mut query = sqlx::query(&bound.sql);
        for value in &bound.values {
            query = bind_postgres_param(query, value);
        }
        let rows: Vec<PgRow> = query.fetch(&mut *conn).take(max_rows).try_collect().await?;

        let columns = match rows.first() {
            Some(first) => first.column_names(),
            None => conn
                .prepare(&bound.sql)
                .await?
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
        };

        Ok(FetchedRows {
            columns,
            rows: rows.iter().map(RowValues::to_json_values).collect(),
        })
    }

    async fn probe_rows(conn: &mut PgConnection, bound: &BoundStatement) -> Result<(), sqlx::Error> {
        let mut query = sqlx::query(&bound.sql);
        for value in &bound.values {
            query = bind_postgres_param(query, value);
        }
        query.fetch_optional(&mut *conn).await.map(|_| ())
    }
}

mod sqlite {
    use super::*;
    use crate::db::params::bind_sqlite_param;
    use crate::db::pool::ConnectionLease;
    use crate::db::types::RowValues;
    use futures_util::{StreamExt, TryStreamExt};
    use sqlx::sqlite::{SqliteConnection, SqliteRow};
    use sqlx::{Column, Executor, SqlitePool, Statement};

    pub async fn fetch(
        pool: &SqlitePool,
        bound: &BoundStatement,
        max_rows: usize,
        deadline: Duration,
    ) -> Result<FetchedRows, RunError> {
        with_lease!(pool, deadline, |conn| fetch_rows(conn, bound, max_rows))
    }

    pub async fn probe(
        pool: &SqlitePool,
        bound: &BoundStatement,
        deadline: Duration,
    ) -> Result<(), RunError> {
        with_lease!(pool, deadline, |conn| probe_rows(conn, bound))
    }

    async fn fetch_rows(
        conn: &mut SqliteConnection,
        bound: &BoundStatement,
        max_rows: usize,
    ) -> Result<FetchedRows, sqlx::Error> {
        let mut query = sqlx::query(&bound.sql);
        for value in &bound.values {
            query = bind_sqlite_param(query, value);
        }
        let rows: Vec<SqliteRow> = query.fetch(&mut *conn).take(max_rows).try_collect().await?;

        let columns = match rows.first() {
            Some(first) => first.column_names(),
            None => conn
                .prepare(&bound.sql)
                .await?
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
        };

        Ok(FetchedRows {
            columns,
            rows: rows.iter().map(RowValues::to_json_values).collect(),
        })
    }

    async fn probe_rows(
        conn: &mut SqliteConnection,
        bound: &BoundStatement,
    ) -> Result<(), sqlx::Error> {
        let mut query = sqlx::query(&bound.sql);
        for value in &bound.values {
            query = bind_sqlite_param(query, value);
        }
        query.fetch_optional(&mut *conn).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::AppliedLimit;
    use crate::tools::guard::{GuardPolicy, StatementGuard};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn executor(max_connections: u32) -> QueryExecutor {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_millis(200))
            .connect("sqlite::memory:")
            .await
            .unwrap();
        QueryExecutor::new(DbPool::SQLite(pool), ExecutorSettings::default())
    }

    fn guarded(sql: &str, params: SqlParams) -> GuardedStatement {
        StatementGuard::new(DatabaseType::SQLite, GuardPolicy::default())
            .guard(sql, params)
            .unwrap()
    }

    #[tokio::test]
    async fn test_execute_returns_positional_rows() {
        let exec = executor(1).await;
        let stmt = guarded(
            "SELECT 1 AS id, 'a' AS name UNION ALL SELECT 2, 'b'",
            SqlParams::new(),
        );
        let result = exec
            .execute(&stmt, stmt.applied_limit().as_query_limit())
            .await
            .unwrap();
        assert_eq!(result.columns, vec!["id", "name"]);
        assert_eq!(
            result.rows,
            vec![
                vec![serde_json::json!(1), serde_json::json!("a")],
                vec![serde_json::json!(2), serde_json::json!("b")]
            ]
        );
        assert_eq!(result.limit, 100);
        assert!(!result.limit_reached);
    }

    #[tokio::test]
    async fn test_execute_caps_rows_at_limit() {
        let exec = executor(1).await;
        let stmt = guarded(
            "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 50) SELECT x FROM n",
            SqlParams::new(),
        );
        let limit = QueryLimit::new(10, 1000).unwrap();
        let result = exec.execute(&stmt, limit).await.unwrap();
        assert_eq!(result.row_count(), 10);
        assert!(result.limit_reached);
    }

    #[tokio::test]
    async fn test_execute_binds_named_params() {
        let exec = executor(1).await;
        let stmt = guarded(
            "SELECT :a + :b AS total, :a AS a",
            SqlParams::new().with("a", 2_i64).with("b", 3_i64),
        );
        let result = exec
            .execute(&stmt, AppliedLimit { rows: 5, injected: false }.as_query_limit())
            .await
            .unwrap();
        assert_eq!(result.rows[0], vec![serde_json::json!(5), serde_json::json!(2)]);
    }

    #[tokio::test]
    async fn test_backend_error_maps_to_backend_kind() {
        let exec = executor(1).await;
        let stmt = guarded("SELECT * FROM missing_table", SqlParams::new());
        let err = exec
            .execute(&stmt, QueryLimit::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BackendError);
        assert!(err.message.contains("missing_table"));
    }

    #[tokio::test]
    async fn test_probe_error_maps_to_validation() {
        let exec = executor(1).await;
        let err = exec
            .probe("SELECT * FROM missing_table", &SqlParams::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationError);
    }

    #[tokio::test]
    async fn test_connection_released_after_error() {
        let exec = executor(1).await;
        let bad = guarded("SELECT * FROM missing_table", SqlParams::new());
        for _ in 0..3 {
            assert!(exec.execute(&bad, QueryLimit::default()).await.is_err());
        }
        let good = guarded("SELECT 1 AS one", SqlParams::new());
        let result = exec.execute(&good, QueryLimit::default()).await.unwrap();
        assert_eq!(result.row_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_result_still_reports_columns() {
        let exec = executor(1).await;
        let stmt = guarded("SELECT 1 AS a, 2 AS b WHERE 1 = 0", SqlParams::new());
        let result = exec.execute(&stmt, QueryLimit::default()).await.unwrap();
        assert!(result.rows.is_empty());
        assert_eq!(result.columns, vec!["a", "b"]);
    }
}
