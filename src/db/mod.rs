//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Connection pool and per-statement connection leases
//! - Named parameter resolution and binding
//! - Row value normalisation
//! - Pre-flight probing and query execution
//! - Catalog introspection and the cached Schema Catalog

pub mod catalog;
pub mod executor;
pub mod params;
pub mod pool;
pub mod preflight;
pub mod schema;
pub mod types;

pub use catalog::{CatalogSettings, CatalogSnapshot, SchemaCatalog};
pub use executor::{ExecutorSettings, QueryExecutor};
pub use pool::{ConnectionLease, DbPool, PoolSettings};
pub use preflight::PreflightValidator;
