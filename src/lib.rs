//! sqlgate library
//!
//! A safety gate between an SQL-generating agent and a PostgreSQL or SQLite
//! database: a read-only, single-statement, row-limited statement guard, a
//! zero-row pre-flight probe, pooled execution with deadlines, and a cached
//! schema catalog, exposed as MCP (Model Context Protocol) tools.

pub mod config;
pub mod db;
pub mod error;
pub mod mcp;
pub mod models;
pub mod tools;
pub mod transport;

pub use config::Config;
pub use error::{ErrorKind, GateError, GateResult, StartupError};
pub use mcp::GateService;
