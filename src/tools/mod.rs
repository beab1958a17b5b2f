//! MCP tool implementations.
//!
//! This module contains the statement guard and the tool handlers:
//! - `lexer`: tokenizer-lite pass over SQL text
//! - `guard`: read-only, single-statement and row-limit checks
//! - `query`: the `run_query` tool (guard, pre-flight, execute)
//! - `schema`: the `describe_schema` tool

pub mod guard;
pub mod lexer;
pub mod query;
pub mod schema;

pub use guard::{GuardPolicy, StatementGuard};
pub use query::{QueryOutcome, QueryToolHandler, RunQueryInput, RunQueryOutput};
pub use schema::{DescribeSchemaInput, DescribeSchemaOutput, SchemaToolHandler};
