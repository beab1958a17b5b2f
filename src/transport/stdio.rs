//! Stdio transport for the MCP server.
//!
//! This transport uses standard input/output for communication,
//! which is the standard mode for CLI-based MCP integrations.

use crate::db::DbPool;
use crate::error::StartupError;
use crate::mcp::GateService;
use crate::transport::Transport;
use rmcp::{ServiceExt, transport::stdio};
use tokio::signal;
use tracing::{info, warn};

/// Stdio transport implementation.
///
/// Reads JSON-RPC messages from stdin and writes responses to stdout. On
/// client disconnect or SIGINT/SIGTERM the pool is closed before returning.
pub struct StdioTransport {
    service: GateService,
    pool: DbPool,
}

impl StdioTransport {
    pub fn new(service: GateService, pool: DbPool) -> Self {
        Self { service, pool }
    }
}

impl Transport for StdioTransport {
    async fn run(&self) -> Result<(), StartupError> {
        info!("Starting MCP server with stdio transport");

        let running_service = self
            .service
            .clone()
            .serve(stdio())
            .await
            .map_err(|e| StartupError::Transport(format!("failed to start stdio transport: {}", e)))?;

        let shutdown_requested = tokio::select! {
            result = running_service.waiting() => {
                match result {
                    Ok(_quit_reason) => info!("Stdio transport completed normally"),
                    Err(e) => {
                        warn!(error = %e, "Stdio transport error");
                        self.pool.close().await;
                        return Err(StartupError::Transport(e.to_string()));
                    }
                }
                false
            }
            _ = wait_for_signal() => {
                info!("Shutdown signal received (send again to force exit)");
                true
            }
        };

        if shutdown_requested {
            tokio::spawn(async {
                wait_for_signal().await;
                warn!("Received second signal, forcing immediate exit");
                std::process::exit(1);
            });
        }

        info!("Closing database connections");
        self.pool.close().await;

        if shutdown_requested {
            // the stdin reader cannot be interrupted by select!
            info!("Exiting process");
            std::process::exit(0);
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "stdio"
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CatalogSettings, ExecutorSettings, QueryExecutor, SchemaCatalog};
    use crate::models::DatabaseType;
    use crate::tools::{GuardPolicy, QueryToolHandler, StatementGuard};
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_stdio_transport_creation() {
        let pool = DbPool::SQLite(
            SqlitePoolOptions::new()
                .connect("sqlite::memory:")
                .await
                .unwrap(),
        );
        let service = GateService::new(
            QueryToolHandler::new(
                StatementGuard::new(DatabaseType::SQLite, GuardPolicy::default()),
                QueryExecutor::new(pool.clone(), ExecutorSettings::default()),
            ),
            Arc::new(SchemaCatalog::new(pool.clone(), CatalogSettings::default())),
        );
        let transport = StdioTransport::new(service, pool);
        assert_eq!(transport.name(), "stdio");
    }
}
