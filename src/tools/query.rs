//! Query tool.
//!
//! This module implements the `run_query` MCP tool: Statement Guard, then
//! Pre-flight Validator, then Query Executor, short-circuiting on the first
//! failure. Failures are returned in-band with their error kind so the agent
//! can tell a rejected statement from a broken database.

use crate::db::{PreflightValidator, QueryExecutor, SchemaCatalog};
use crate::error::{ErrorKind, GateError, GateResult};
use crate::models::{GuardedStatement, QueryResult, SqlParams};
use crate::tools::guard::StatementGuard;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

/// Input for the run_query tool.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct RunQueryInput {
    /// A single read-only SELECT (or WITH ... SELECT) statement. Use :name placeholders for values.
    pub sql: String,
    /// Values for :name placeholders, keyed by name
    #[serde(default)]
    pub params: BTreeMap<String, JsonValue>,
    /// Maximum rows to return when the SQL has no LIMIT. Default: 100
    #[serde(default)]
    pub limit: Option<u32>,
}

impl RunQueryInput {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Self::default()
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Output from the run_query tool.
///
/// `ok: true` carries the result fields, `ok: false` carries `error_kind`,
/// `message` and optionally `fragment`. Rows never accompany an error.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct RunQueryOutput {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    /// Rows as arrays, positionally aligned with `columns`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Vec<JsonValue>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    /// Effective row limit applied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// True if the LIMIT clause was appended to the submitted SQL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_injected: Option<bool>,
    /// True if row_count equals limit; more rows may exist
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_reached: Option<bool>,
    /// The SQL text actually executed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Statement fragment that triggered the error, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fragment: Option<String>,
}

impl RunQueryOutput {
    pub fn success(outcome: QueryOutcome) -> Self {
        // report the limit the statement carries; the fetch cap never drops below one
        let applied = outcome.statement.applied_limit();
        let result = outcome.result;
        Self {
            ok: true,
            row_count: Some(result.row_count()),
            limit_reached: Some(result.row_count() >= applied.rows as usize),
            columns: Some(result.columns),
            rows: Some(result.rows),
            limit: Some(applied.rows),
            limit_injected: Some(applied.injected),
            executed_sql: Some(outcome.statement.sql().to_string()),
            execution_time_ms: Some(result.execution_time_ms),
            error_kind: None,
            message: None,
            fragment: None,
        }
    }

    pub fn failure(err: GateError) -> Self {
        Self {
            ok: false,
            columns: None,
            rows: None,
            row_count: None,
            limit: None,
            limit_injected: None,
            limit_reached: None,
            executed_sql: None,
            execution_time_ms: None,
            error_kind: Some(err.kind),
            message: Some(err.message),
            fragment: err.fragment,
        }
    }
}

impl From<GateResult<QueryOutcome>> for RunQueryOutput {
    fn from(result: GateResult<QueryOutcome>) -> Self {
        match result {
            Ok(outcome) => Self::success(outcome),
            Err(err) => Self::failure(err),
        }
    }
}

/// A guarded statement and the rows it produced.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub statement: GuardedStatement,
    pub result: QueryResult,
}

/// Handler for run_query.
#[derive(Debug, Clone)]
pub struct QueryToolHandler {
    guard: StatementGuard,
    preflight: PreflightValidator,
    executor: QueryExecutor,
    catalog: Option<Arc<SchemaCatalog>>,
}

impl QueryToolHandler {
    pub fn new(guard: StatementGuard, executor: QueryExecutor) -> Self {
        Self {
            guard,
            preflight: PreflightValidator::new(executor.clone()),
            executor,
            catalog: None,
        }
    }

    /// Drop cached schema descriptions whenever a statement fails pre-flight,
    /// so the agent's next describe_schema reads the live catalog.
    pub fn with_catalog(mut self, catalog: Arc<SchemaCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn guard(&self) -> &StatementGuard {
        &self.guard
    }

    /// Handle the run_query tool call.
    pub async fn run_query(&self, input: RunQueryInput) -> RunQueryOutput {
        let request_id = Uuid::new_v4();
        let span = info_span!("run_query", %request_id);
        self.execute(input).instrument(span).await.into()
    }

    /// Guard, probe and execute one statement.
    pub async fn execute(&self, input: RunQueryInput) -> GateResult<QueryOutcome> {
        let limit = self.guard.query_limit(input.limit)?;
        let statement =
            self.guard
                .guard_with_limit(&input.sql, SqlParams::from(input.params), limit)?;

        if let Err(err) = self.preflight.validate(&statement).await {
            if err.kind == ErrorKind::ValidationError {
                if let Some(catalog) = &self.catalog {
                    catalog.invalidate_all().await;
                }
            }
            return Err(err);
        }

        let result = self
            .executor
            .execute(&statement, statement.applied_limit().as_query_limit())
            .await?;

        info!(
            row_count = result.row_count(),
            limit = statement.applied_limit().rows,
            execution_time_ms = result.execution_time_ms,
            "Query executed"
        );

        Ok(QueryOutcome { statement, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DbPool, ExecutorSettings};
    use crate::models::DatabaseType;
    use crate::tools::guard::GuardPolicy;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn handler() -> QueryToolHandler {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO users (id, name) VALUES (1, 'ada'), (2, 'grace'), (3, 'edsger')")
            .execute(&pool)
            .await
            .unwrap();
        QueryToolHandler::new(
            StatementGuard::new(DatabaseType::SQLite, GuardPolicy::default()),
            QueryExecutor::new(DbPool::SQLite(pool), ExecutorSettings::default()),
        )
    }

    #[test]
    fn test_run_query_input_deserialization() {
        let input: RunQueryInput = serde_json::from_value(json!({
            "sql": "SELECT :id",
            "params": {"id": 7}
        }))
        .unwrap();
        assert_eq!(input.sql, "SELECT :id");
        assert_eq!(input.params["id"], json!(7));
        assert!(input.limit.is_none());
    }

    #[test]
    fn test_failure_output_omits_result_fields() {
        let out = RunQueryOutput::failure(
            GateError::disallowed("only SELECT statements are permitted").with_fragment("DELETE"),
        );
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(
            json,
            json!({
                "ok": false,
                "error_kind": "DisallowedStatementKind",
                "message": "only SELECT statements are permitted",
                "fragment": "DELETE"
            })
        );
    }

    #[tokio::test]
    async fn test_run_query_injects_limit() {
        let out = handler()
            .await
            .run_query(RunQueryInput::new("SELECT id, name FROM users ORDER BY id"))
            .await;
        assert!(out.ok, "{:?}", out);
        assert_eq!(
            out.executed_sql.as_deref(),
            Some("SELECT id, name FROM users ORDER BY id LIMIT 100")
        );
        assert_eq!(out.columns, Some(vec!["id".to_string(), "name".to_string()]));
        assert_eq!(out.row_count, Some(3));
        assert_eq!(out.limit_injected, Some(true));
        assert_eq!(out.limit_reached, Some(false));
    }

    #[tokio::test]
    async fn test_run_query_requested_limit_is_reached() {
        let out = handler()
            .await
            .run_query(RunQueryInput::new("SELECT id FROM users ORDER BY id").with_limit(2))
            .await;
        assert_eq!(out.rows, Some(vec![vec![json!(1)], vec![json!(2)]]));
        assert_eq!(out.limit, Some(2));
        assert_eq!(out.limit_reached, Some(true));
    }

    #[tokio::test]
    async fn test_run_query_reports_explicit_limit_zero() {
        let out = handler()
            .await
            .run_query(RunQueryInput::new("SELECT id FROM users LIMIT 0"))
            .await;
        assert!(out.ok, "{:?}", out);
        assert_eq!(out.executed_sql.as_deref(), Some("SELECT id FROM users LIMIT 0"));
        assert_eq!(out.limit, Some(0));
        assert_eq!(out.row_count, Some(0));
        assert_eq!(out.limit_reached, Some(true));
        assert_eq!(out.columns, Some(vec!["id".to_string()]));
    }

    #[tokio::test]
    async fn test_run_query_requested_limit_out_of_range() {
        let h = handler().await;
        for limit in [0, 1001] {
            let out = h
                .run_query(RunQueryInput::new("SELECT 1").with_limit(limit))
                .await;
            assert_eq!(out.error_kind, Some(ErrorKind::LimitExceeded));
        }
    }

    #[tokio::test]
    async fn test_run_query_binds_named_params() {
        let out = handler()
            .await
            .run_query(
                RunQueryInput::new("SELECT name FROM users WHERE id = :id").with_param("id", 2),
            )
            .await;
        assert_eq!(out.rows, Some(vec![vec![json!("grace")]]));
    }

    #[tokio::test]
    async fn test_run_query_unknown_column_fails_preflight() {
        let out = handler()
            .await
            .run_query(RunQueryInput::new("SELECT missing_col FROM users"))
            .await;
        assert!(!out.ok);
        assert_eq!(out.error_kind, Some(ErrorKind::ValidationError));
        assert!(out.message.unwrap_or_default().contains("missing_col"));
        assert!(out.rows.is_none());
    }
}
