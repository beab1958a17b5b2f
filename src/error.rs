//! Error types for sqlgate.
//!
//! Every failure a caller of `run_query` can observe is a [`GateError`] tagged
//! with one [`ErrorKind`]. Failures that can only happen while the process is
//! starting up (bad configuration, unreachable database) are [`StartupError`]s
//! and never reach tool callers.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure taxonomy surfaced to the upstream agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ErrorKind {
    /// Not a SELECT, or contains a mutating/DDL keyword.
    DisallowedStatementKind,
    /// Statement separator outside literals.
    MultiStatementRejected,
    /// Explicit or requested LIMIT above the configured maximum.
    LimitExceeded,
    /// Zero-row probe failed, or parameters do not match placeholders.
    ValidationError,
    /// No pooled connection became available in time.
    PoolExhausted,
    /// Unmapped database failure during real execution.
    BackendError,
    /// Statement exceeded its deadline.
    Timeout,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DisallowedStatementKind => "DisallowedStatementKind",
            Self::MultiStatementRejected => "MultiStatementRejected",
            Self::LimitExceeded => "LimitExceeded",
            Self::ValidationError => "ValidationError",
            Self::PoolExhausted => "PoolExhausted",
            Self::BackendError => "BackendError",
            Self::Timeout => "Timeout",
        }
    }

    /// True for kinds raised by static checks, before any backend contact.
    pub fn is_static_rejection(&self) -> bool {
        matches!(
            self,
            Self::DisallowedStatementKind | Self::MultiStatementRejected | Self::LimitExceeded
        )
    }

    /// Whether the caller may reasonably retry the same statement later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PoolExhausted | Self::Timeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured failure: kind, human-readable message and, when known, the
/// statement fragment that triggered it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct GateError {
    pub kind: ErrorKind,
    pub message: String,
    pub fragment: Option<String>,
}

impl GateError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            fragment: None,
        }
    }

    /// Attach the offending statement fragment.
    pub fn with_fragment(mut self, fragment: impl Into<String>) -> Self {
        let fragment = fragment.into();
        if !fragment.is_empty() {
            self.fragment = Some(fragment);
        }
        self
    }

    pub fn disallowed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DisallowedStatementKind, message)
    }

    pub fn multi_statement(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MultiStatementRejected, message)
    }

    pub fn limit_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LimitExceeded, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, message)
    }

    pub fn pool_exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PoolExhausted, message)
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BackendError, message)
    }

    pub fn timeout(operation: &str, deadline: std::time::Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("{} exceeded {}ms deadline", operation, deadline.as_millis()),
        )
    }

    /// Map a driver error raised while running the real statement.
    pub fn from_execution(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => {
                Self::pool_exhausted("no database connection became available in time")
            }
            sqlx::Error::PoolClosed => Self::pool_exhausted("connection pool is closed"),
            ref other if is_server_cancellation(other) => {
                Self::new(ErrorKind::Timeout, driver_message(other))
            }
            other => Self::backend(driver_message(&other)),
        }
    }

    /// Map a driver error raised by the zero-row probe.
    pub fn from_probe(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => Self::from_execution(err),
            _ if is_server_cancellation(&err) => Self::from_execution(err),
            other => Self::validation(driver_message(&other)),
        }
    }
}

/// PostgreSQL `query_canceled`, raised when `statement_timeout` fires.
fn is_server_cancellation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("57014"))
}

/// Render a driver error as "message (SQLSTATE: code)" when the database
/// reported a code.
pub fn driver_message(err: &sqlx::Error) -> String {
    match err {
        sqlx::Error::Database(db_err) => match db_err.code() {
            Some(code) => format!("{} (SQLSTATE: {})", db_err.message(), code),
            None => db_err.message().to_string(),
        },
        sqlx::Error::Io(io_err) => format!("I/O error: {}", io_err),
        sqlx::Error::Protocol(msg) => format!("protocol error: {}", msg),
        sqlx::Error::ColumnDecode { index, source } => {
            format!("failed to decode column {}: {}", index, source)
        }
        other => other.to_string(),
    }
}

/// Result type alias for gated operations.
pub type GateResult<T> = Result<T, GateError>;

/// Errors raised before the server starts serving requests.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unsupported database URL scheme '{scheme}'. Use postgres:// or sqlite:")]
    UnsupportedScheme { scheme: String },

    #[error("Failed to connect to {target}: {message}")]
    Connect { target: String, message: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

fn error_data(err: &GateError) -> Option<serde_json::Value> {
    let mut data = serde_json::json!({ "error_kind": err.kind.as_str() });
    if let Some(fragment) = &err.fragment {
        data["fragment"] = serde_json::Value::String(fragment.clone());
    }
    Some(data)
}

/// Convert GateError to MCP ErrorData. Static rejections and validation
/// failures are the caller's input problem; the rest are server-side.
impl From<GateError> for rmcp::ErrorData {
    fn from(err: GateError) -> Self {
        let data = error_data(&err);
        match err.kind {
            ErrorKind::DisallowedStatementKind
            | ErrorKind::MultiStatementRejected
            | ErrorKind::LimitExceeded
            | ErrorKind::ValidationError => rmcp::ErrorData::invalid_params(err.to_string(), data),
            ErrorKind::PoolExhausted | ErrorKind::BackendError | ErrorKind::Timeout => {
                rmcp::ErrorData::internal_error(err.to_string(), data)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_display_includes_kind() {
        let err = GateError::disallowed("only SELECT statements are permitted");
        assert_eq!(
            err.to_string(),
            "DisallowedStatementKind: only SELECT statements are permitted"
        );
    }

    #[test]
    fn test_kind_serializes_as_name() {
        let json = serde_json::to_value(ErrorKind::MultiStatementRejected).unwrap();
        assert_eq!(json, "MultiStatementRejected");
    }

    #[test]
    fn test_with_fragment_ignores_empty() {
        let err = GateError::disallowed("x").with_fragment("");
        assert!(err.fragment.is_none());
        let err = GateError::disallowed("x").with_fragment("DROP");
        assert_eq!(err.fragment.as_deref(), Some("DROP"));
    }

    #[test]
    fn test_pool_timeout_maps_to_pool_exhausted() {
        let err = GateError::from_execution(sqlx::Error::PoolTimedOut);
        assert_eq!(err.kind, ErrorKind::PoolExhausted);
        let err = GateError::from_probe(sqlx::Error::PoolTimedOut);
        assert_eq!(err.kind, ErrorKind::PoolExhausted);
    }

    #[test]
    fn test_unmapped_errors_become_backend_or_validation() {
        let err = GateError::from_execution(sqlx::Error::Protocol("bad frame".into()));
        assert_eq!(err.kind, ErrorKind::BackendError);
        assert!(err.message.contains("bad frame"));

        let err = GateError::from_probe(sqlx::Error::Protocol("bad frame".into()));
        assert_eq!(err.kind, ErrorKind::ValidationError);
    }

    #[test]
    fn test_timeout_message() {
        let err = GateError::timeout("statement", Duration::from_millis(250));
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(err.message.contains("250ms"));
        assert!(err.kind.is_retryable());
    }

    #[test]
    fn test_static_rejection_kinds() {
        assert!(ErrorKind::LimitExceeded.is_static_rejection());
        assert!(!ErrorKind::ValidationError.is_static_rejection());
        assert!(!ErrorKind::BackendError.is_retryable());
    }

    #[test]
    fn test_guard_kinds_map_to_invalid_params() {
        let mcp_err: rmcp::ErrorData = GateError::multi_statement("stacked").into();
        assert_eq!(mcp_err.code.0, -32602);
        let data = mcp_err.data.unwrap();
        assert_eq!(data["error_kind"], "MultiStatementRejected");
    }

    #[test]
    fn test_backend_kinds_map_to_internal_error() {
        let mcp_err: rmcp::ErrorData = GateError::backend("boom").into();
        assert_eq!(mcp_err.code.0, -32603);
        let mcp_err: rmcp::ErrorData =
            GateError::timeout("statement", Duration::from_secs(1)).into();
        assert_eq!(mcp_err.code.0, -32603);
    }

    #[test]
    fn test_fragment_in_error_data() {
        let mcp_err: rmcp::ErrorData = GateError::disallowed("no").with_fragment("DELETE").into();
        assert_eq!(mcp_err.data.unwrap()["fragment"], "DELETE");
    }
}
