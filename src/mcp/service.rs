//! MCP service implementation using rmcp.
//!
//! This module defines the GateService struct exposing `run_query` and
//! `describe_schema` via the MCP protocol using the rmcp framework's macros.

use crate::db::SchemaCatalog;
use crate::tools::query::{QueryToolHandler, RunQueryInput, RunQueryOutput};
use crate::tools::schema::{DescribeSchemaInput, DescribeSchemaOutput, SchemaToolHandler};
use rmcp::Json;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct GateService {
    query: QueryToolHandler,
    schema: SchemaToolHandler,
    /// Tool router for MCP tool dispatch (auto-generated)
    tool_router: ToolRouter<Self>,
}

impl GateService {
    /// Create a service over a query handler and the shared schema catalog.
    ///
    /// The query handler is linked to the catalog so that a statement failing
    /// pre-flight drops cached descriptions.
    pub fn new(query: QueryToolHandler, catalog: Arc<SchemaCatalog>) -> Self {
        Self {
            query: query.with_catalog(Arc::clone(&catalog)),
            schema: SchemaToolHandler::new(catalog),
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router]
impl GateService {
    #[tool(
        description = "Run one read-only SQL SELECT (or WITH ... SELECT) and return rows.\nValues go in `params` and are referenced as :name placeholders; never inline them.\nA LIMIT is appended when the SQL has none (`limit`, default 100); explicit LIMITs above the server maximum are rejected.\nOn failure returns ok=false with error_kind: DisallowedStatementKind, MultiStatementRejected, LimitExceeded, ValidationError, PoolExhausted, BackendError or Timeout."
    )]
    async fn run_query(
        &self,
        Parameters(input): Parameters<RunQueryInput>,
    ) -> Json<RunQueryOutput> {
        Json(self.query.run_query(input).await)
    }

    #[tool(
        description = "Describe tables and columns (name, type, nullable) for writing SQL.\nOptionally restrict to one schema. Results are cached; pass refresh=true after schema changes.\nAlso returns a compact one-line-per-table `text` form."
    )]
    async fn describe_schema(
        &self,
        Parameters(input): Parameters<DescribeSchemaInput>,
    ) -> Result<Json<DescribeSchemaOutput>, McpError> {
        self.schema
            .describe_schema(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }
}

#[tool_handler]
impl ServerHandler for GateService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "sqlgate".to_owned(),
                title: Some("SQL Gate".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Read-only SQL access to a single database.\n\
                \n\
                ## Workflow\n\
                1. Call `describe_schema` to learn table and column names\n\
                2. Call `run_query` with one SELECT statement and :name parameters\n\
                3. If `limit_reached` is true, more rows may exist; narrow the query or page with OFFSET\n\
                \n\
                ## Rules\n\
                - Only SELECT and WITH ... SELECT are accepted; one statement per call\n\
                - INSERT, UPDATE, DELETE, DDL and SELECT INTO are rejected anywhere in the text\n\
                - A statement is checked with a zero-row probe before it runs; ValidationError means fix the SQL, not retry\n\
                - PoolExhausted and Timeout may succeed on a later retry"
                    .to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CatalogSettings, DbPool, ExecutorSettings, QueryExecutor};
    use crate::error::ErrorKind;
    use crate::models::DatabaseType;
    use crate::tools::guard::{GuardPolicy, StatementGuard};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_service() -> GateService {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("CREATE TABLE t (id INTEGER)")
            .execute(&pool)
            .await
            .unwrap();
        let pool = DbPool::SQLite(pool);
        let catalog = Arc::new(SchemaCatalog::new(pool.clone(), CatalogSettings::default()));
        let query = QueryToolHandler::new(
            StatementGuard::new(DatabaseType::SQLite, GuardPolicy::default()),
            QueryExecutor::new(pool, ExecutorSettings::default()),
        );
        GateService::new(query, catalog)
    }

    #[tokio::test]
    async fn test_server_info() {
        let service = create_test_service().await;
        let info = service.get_info();
        assert_eq!(info.server_info.name, "sqlgate");
        assert!(info.capabilities.tools.is_some());
        assert!(info.instructions.unwrap().contains("run_query"));
    }

    #[tokio::test]
    async fn test_run_query_reports_errors_in_band() {
        let service = create_test_service().await;
        let Json(out) = service
            .run_query(Parameters(RunQueryInput::new("DROP TABLE t")))
            .await;
        assert!(!out.ok);
        assert_eq!(out.error_kind, Some(ErrorKind::DisallowedStatementKind));
    }

    #[tokio::test]
    async fn test_preflight_failure_clears_catalog() {
        let service = create_test_service().await;
        service
            .describe_schema(Parameters(DescribeSchemaInput::default()))
            .await
            .unwrap();
        let Json(out) = service
            .run_query(Parameters(RunQueryInput::new("SELECT nope FROM t")))
            .await;
        assert_eq!(out.error_kind, Some(ErrorKind::ValidationError));

        service
            .describe_schema(Parameters(DescribeSchemaInput::default()))
            .await
            .unwrap();
        assert_eq!(service.schema.catalog().fetch_count(), 2);
    }
}
