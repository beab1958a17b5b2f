//! Data models for sqlgate.
//!
//! This module re-exports all model types used throughout the application.

pub mod connection;
pub mod query;
pub mod schema;

// Re-export commonly used types
pub use connection::{DatabaseType, masked_connection_string};
pub use query::{
    AppliedLimit, DEFAULT_ROW_LIMIT, GuardedStatement, MAX_ROW_LIMIT, QueryLimit, QueryParam,
    QueryResult, SqlParams, SqlStatement, StatementKind,
};
pub use schema::{ColumnDescriptor, SchemaDescriptor, TableDescriptor};
