//! Configuration handling for sqlgate.
//!
//! This module provides configuration management via CLI arguments and
//! environment variables. The library types never see clap: [`Config`]
//! hands out plain settings structs for the guard, pool, executor and
//! catalog.

use crate::db::{CatalogSettings, ExecutorSettings, PoolSettings};
use crate::error::StartupError;
use crate::models::{DEFAULT_ROW_LIMIT, DatabaseType, MAX_ROW_LIMIT};
use crate::tools::GuardPolicy;
use clap::Parser;
use std::time::Duration;

pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 5;

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MAX_CONNECTIONS_SQLITE: u32 = 1;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 0;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

// Schema catalog defaults
pub const DEFAULT_SCHEMA_TTL_SECS: u64 = 300;
pub const DEFAULT_SCHEMA_TABLE_LIMIT: usize = 40;
pub const DEFAULT_SCHEMA_COLUMN_LIMIT: usize = 60;

/// sqlgate - read-only SQL gate for agents, served over MCP stdio.
#[derive(Parser, Debug, Clone)]
#[command(name = "sqlgate")]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Database connection string (postgres://... or sqlite:path)
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: String,

    /// Row limit appended to statements without a LIMIT
    #[arg(long, default_value_t = DEFAULT_ROW_LIMIT, env = "SQLGATE_DEFAULT_LIMIT")]
    pub default_limit: u32,

    /// Largest LIMIT a statement or caller may ask for
    #[arg(long, default_value_t = MAX_ROW_LIMIT, env = "SQLGATE_MAX_LIMIT")]
    pub max_limit: u32,

    /// Per-statement deadline in seconds, for pre-flight and execution
    #[arg(
        long,
        default_value_t = DEFAULT_QUERY_TIMEOUT_SECS,
        env = "SQLGATE_QUERY_TIMEOUT"
    )]
    pub query_timeout: u64,

    /// Seconds to wait for a pooled connection
    #[arg(
        long,
        default_value_t = DEFAULT_ACQUIRE_TIMEOUT_SECS,
        env = "SQLGATE_ACQUIRE_TIMEOUT"
    )]
    pub acquire_timeout: u64,

    /// Maximum pool connections (default: 10, or 1 for SQLite)
    #[arg(long, env = "SQLGATE_MAX_CONNECTIONS")]
    pub max_connections: Option<u32>,

    /// Idle connections kept open
    #[arg(
        long,
        default_value_t = DEFAULT_MIN_CONNECTIONS,
        env = "SQLGATE_MIN_CONNECTIONS"
    )]
    pub min_connections: u32,

    /// Seconds before an idle connection is closed (0 disables)
    #[arg(
        long,
        default_value_t = DEFAULT_IDLE_TIMEOUT_SECS,
        env = "SQLGATE_IDLE_TIMEOUT"
    )]
    pub idle_timeout: u64,

    /// Seconds a schema description stays cached
    #[arg(
        long,
        default_value_t = DEFAULT_SCHEMA_TTL_SECS,
        env = "SQLGATE_SCHEMA_TTL"
    )]
    pub schema_ttl: u64,

    /// Tables reported per describe_schema call
    #[arg(
        long,
        default_value_t = DEFAULT_SCHEMA_TABLE_LIMIT,
        env = "SQLGATE_SCHEMA_TABLE_LIMIT"
    )]
    pub schema_table_limit: usize,

    /// Columns reported per table
    #[arg(
        long,
        default_value_t = DEFAULT_SCHEMA_COLUMN_LIMIT,
        env = "SQLGATE_SCHEMA_COLUMN_LIMIT"
    )]
    pub schema_column_limit: usize,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, default_value = "info", env = "SQLGATE_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "SQLGATE_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a configuration with every default and the given URL.
    pub fn for_url(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            default_limit: DEFAULT_ROW_LIMIT,
            max_limit: MAX_ROW_LIMIT,
            query_timeout: DEFAULT_QUERY_TIMEOUT_SECS,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT_SECS,
            max_connections: None,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT_SECS,
            schema_ttl: DEFAULT_SCHEMA_TTL_SECS,
            schema_table_limit: DEFAULT_SCHEMA_TABLE_LIMIT,
            schema_column_limit: DEFAULT_SCHEMA_COLUMN_LIMIT,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }

    /// Backend selected by the URL scheme.
    pub fn database_type(&self) -> Result<DatabaseType, StartupError> {
        DatabaseType::from_connection_string(&self.database_url).ok_or_else(|| {
            StartupError::UnsupportedScheme {
                scheme: self
                    .database_url
                    .split(':')
                    .next()
                    .unwrap_or_default()
                    .to_string(),
            }
        })
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), StartupError> {
        self.database_type()?;

        if self.default_limit == 0 {
            return Err(invalid("default_limit must be greater than 0"));
        }
        if self.max_limit == 0 {
            return Err(invalid("max_limit must be greater than 0"));
        }
        if self.default_limit > self.max_limit {
            return Err(invalid(format!(
                "default_limit ({}) cannot exceed max_limit ({})",
                self.default_limit, self.max_limit
            )));
        }
        if self.query_timeout == 0 {
            return Err(invalid("query_timeout must be greater than 0"));
        }
        if self.acquire_timeout == 0 {
            return Err(invalid("acquire_timeout must be greater than 0"));
        }
        let max = self.max_connections_or_default();
        if max == 0 {
            return Err(invalid("max_connections must be greater than 0"));
        }
        if self.min_connections > max {
            return Err(invalid(format!(
                "min_connections ({}) cannot exceed max_connections ({})",
                self.min_connections, max
            )));
        }
        if self.schema_table_limit == 0 || self.schema_column_limit == 0 {
            return Err(invalid("schema table and column limits must be greater than 0"));
        }
        Ok(())
    }

    /// Get max_connections with default value based on database type.
    pub fn max_connections_or_default(&self) -> u32 {
        let is_sqlite = self
            .database_type()
            .is_ok_and(|t| t == DatabaseType::SQLite);
        self.max_connections.unwrap_or(if is_sqlite {
            DEFAULT_MAX_CONNECTIONS_SQLITE
        } else {
            DEFAULT_MAX_CONNECTIONS
        })
    }

    /// Get the query timeout as a Duration.
    pub fn query_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.query_timeout)
    }

    pub fn guard_policy(&self) -> GuardPolicy {
        GuardPolicy {
            default_limit: self.default_limit,
            max_limit: self.max_limit,
        }
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.max_connections_or_default(),
            min_connections: self.min_connections,
            acquire_timeout: Duration::from_secs(self.acquire_timeout),
            idle_timeout: (self.idle_timeout > 0).then(|| Duration::from_secs(self.idle_timeout)),
            statement_timeout: Some(self.query_timeout_duration()),
        }
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            statement_timeout: self.query_timeout_duration(),
        }
    }

    pub fn catalog_settings(&self) -> CatalogSettings {
        CatalogSettings {
            ttl: Duration::from_secs(self.schema_ttl),
            max_tables: self.schema_table_limit,
            max_columns: self.schema_column_limit,
        }
    }
}

fn invalid(message: impl Into<String>) -> StartupError {
    StartupError::Config(message.into())
}
