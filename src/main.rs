//! sqlgate - Main entry point.
//!
//! Serves the `run_query` and `describe_schema` MCP tools over stdio against
//! a single PostgreSQL or SQLite database.

use clap::Parser;
use sqlgate::config::Config;
use sqlgate::db::{DbPool, QueryExecutor, SchemaCatalog};
use sqlgate::mcp::GateService;
use sqlgate::tools::{QueryToolHandler, StatementGuard};
use sqlgate::transport::{StdioTransport, Transport};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber. Logs go to stderr; stdout carries the
/// MCP protocol.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_ansi(false),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    init_tracing(&config);

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }
    let db_type = config.database_type()?;

    info!(
        database = %db_type,
        default_limit = config.default_limit,
        max_limit = config.max_limit,
        "Starting sqlgate v{}",
        env!("CARGO_PKG_VERSION")
    );

    let pool = DbPool::connect(&config.database_url, &config.pool_settings()).await?;

    let catalog = Arc::new(SchemaCatalog::new(pool.clone(), config.catalog_settings()));
    let query = QueryToolHandler::new(
        StatementGuard::new(db_type, config.guard_policy()),
        QueryExecutor::new(pool.clone(), config.executor_settings()),
    );
    let service = GateService::new(query, catalog);

    let transport = StdioTransport::new(service, pool);
    if let Err(e) = transport.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
