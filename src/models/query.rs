//! Query-related data models.
//!
//! This module defines statement, parameter, limit and result types shared by
//! the guard, the pre-flight validator and the executor.

use crate::error::{GateError, GateResult};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Default row limit injected when a statement carries none.
pub const DEFAULT_ROW_LIMIT: u32 = 100;

/// Default upper bound for any LIMIT, explicit or requested.
pub const MAX_ROW_LIMIT: u32 = 1000;

/// A parameter value for parameterized queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    Null,
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    Float(f64),
    String(String),
    /// Arrays and objects, bound as JSON text
    Json(JsonValue),
}

impl QueryParam {
    /// Get the type name of this parameter for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Json(_) => "json",
        }
    }
}

impl From<JsonValue> for QueryParam {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(v) => Self::Bool(v),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => n.as_f64().map(Self::Float).unwrap_or(Self::Null),
            },
            JsonValue::String(s) => Self::String(s),
            other => Self::Json(other),
        }
    }
}

/// Named statement parameters (`:name` placeholders), in name order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SqlParams(BTreeMap<String, QueryParam>);

impl SqlParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<QueryParam>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&QueryParam> {
        self.0.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<String, JsonValue>> for SqlParams {
    fn from(map: BTreeMap<String, JsonValue>) -> Self {
        Self(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Statement classification derived once by the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatementKind {
    Select,
    Other,
}

/// Caller-supplied statement text and parameters with its derived kind.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    text: String,
    params: SqlParams,
    kind: StatementKind,
}

impl SqlStatement {
    pub(crate) fn new(text: impl Into<String>, params: SqlParams, kind: StatementKind) -> Self {
        Self {
            text: text.into(),
            params,
            kind,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn params(&self) -> &SqlParams {
        &self.params
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }
}

/// Row cap for a single statement, always within `1..=max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueryLimit(u32);

impl QueryLimit {
    /// Validate a requested row cap against the configured maximum.
    pub fn new(rows: u32, max: u32) -> GateResult<Self> {
        if rows == 0 || rows > max {
            return Err(GateError::limit_exceeded(format!(
                "limit {} is outside the permitted range 1..={}",
                rows, max
            )));
        }
        Ok(Self(rows))
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl Default for QueryLimit {
    fn default() -> Self {
        Self(DEFAULT_ROW_LIMIT)
    }
}

/// The limit the guard settled on and whether it appended it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AppliedLimit {
    pub rows: u32,
    pub injected: bool,
}

impl AppliedLimit {
    /// `LIMIT 0` is kept in the text; the fetch cap never drops below one.
    pub fn as_query_limit(&self) -> QueryLimit {
        QueryLimit(self.rows.max(1))
    }
}

/// A statement that passed every guard rule.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardedStatement {
    statement: SqlStatement,
    sql: String,
    limit: AppliedLimit,
}

impl GuardedStatement {
    pub(crate) fn new(statement: SqlStatement, sql: String, limit: AppliedLimit) -> Self {
        Self {
            statement,
            sql,
            limit,
        }
    }

    /// The text as submitted.
    pub fn original(&self) -> &str {
        self.statement.text()
    }

    /// The executable text, with the row limit in place.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &SqlParams {
        self.statement.params()
    }

    pub fn kind(&self) -> StatementKind {
        self.statement.kind()
    }

    pub fn applied_limit(&self) -> AppliedLimit {
        self.limit
    }
}

/// Rows returned by the executor, positionally aligned with `columns`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<JsonValue>>,
    /// Effective limit used for this execution
    pub limit: u32,
    /// True when row count equals the limit, so more rows may exist
    pub limit_reached: bool,
    pub execution_time_ms: u64,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}
