//! Pre-flight validation.
//!
//! Before the real run, a guarded statement is executed once in a zero-row
//! form with the same parameter bindings. Syntax errors, unknown tables or
//! columns and type errors surface here as ValidationErrors and are never
//! retried. Passing only means the statement type-checks against the current
//! schema; the real run may still time out or fail.

use crate::db::executor::QueryExecutor;
use crate::error::GateResult;
use crate::models::GuardedStatement;
use tracing::{debug, info};

/// Alias given to the wrapped statement in the probe.
const PROBE_ALIAS: &str = "preflight_probe";

/// Zero-row form of `sql`: the statement wrapped as a derived table with
/// `LIMIT 0` outside it.
pub fn probe_sql(sql: &str) -> String {
    format!("SELECT * FROM ({}) AS {} LIMIT 0", sql, PROBE_ALIAS)
}

#[derive(Debug, Clone)]
pub struct PreflightValidator {
    executor: QueryExecutor,
}

impl PreflightValidator {
    pub fn new(executor: QueryExecutor) -> Self {
        Self { executor }
    }

    /// Probe `guarded` against the database.
    pub async fn validate(&self, guarded: &GuardedStatement) -> GateResult<()> {
        let probe = probe_sql(guarded.sql());
        match self.executor.probe(&probe, guarded.params()).await {
            Ok(()) => {
                debug!("Pre-flight probe passed");
                Ok(())
            }
            Err(err) => {
                info!(kind = %err.kind, error = %err.message, "Pre-flight probe failed");
                Err(err)
            }
        }
    }
}
