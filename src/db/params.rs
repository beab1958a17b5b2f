//! Named parameter resolution and binding.
//!
//! Statements use `:name` placeholders. Before execution each placeholder is
//! rewritten to the backend's positional form (`$n` on PostgreSQL, `?n` on
//! SQLite) and the values are collected in placeholder order. A name used
//! twice maps to the same position. Placeholders inside literals, quoted
//! identifiers and comments are left alone. `::` casts and the colon of an
//! array slice such as `arr[lo:hi]` are not placeholders.

use crate::error::{GateError, GateResult};
use crate::models::{DatabaseType, QueryParam, SqlParams};
use crate::tools::lexer::{self, TokenTag};
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::types::Json;
use sqlx::{Postgres, Sqlite};

/// Statement text in positional form plus its values in bind order.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    pub sql: String,
    pub values: Vec<QueryParam>,
}

/// Rewrite `:name` placeholders in `sql` and line up `params` behind them.
///
/// A placeholder without a value, a value without a placeholder, and
/// positional placeholders written by the caller are all ValidationErrors.
pub fn resolve(sql: &str, params: &SqlParams, db_type: DatabaseType) -> GateResult<BoundStatement> {
    let stream = lexer::tokenize(sql, db_type).map_err(|e| GateError::validation(e.to_string()))?;
    let tokens = stream.tokens();

    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    let mut order: Vec<&str> = Vec::new();
    let mut missing: Vec<String> = Vec::new();

    let mut idx = 0;
    while idx < tokens.len() {
        let token = &tokens[idx];

        if token.bracket_depth > 0 && token.text.starts_with(':') {
            idx += 1;
            continue;
        }

        if token.tag == TokenTag::Placeholder {
            if let Some(name) = token.text.strip_prefix(':') {
                // some dialects hand `:name` over as a single token
                let position = position_of(&mut order, name);
                out.push_str(&sql[copied..token.span.start]);
                out.push_str(&positional(db_type, position));
                copied = token.span.end;
                if params.get(name).is_none() && !missing.iter().any(|m| m == name) {
                    missing.push(name.to_string());
                }
                idx += 1;
                continue;
            }
            return Err(GateError::validation(format!(
                "positional placeholder '{}' is not supported; use :name placeholders",
                token.text
            ))
            .with_fragment(token.text.clone()));
        }

        let name_token = tokens.get(idx + 1);
        let follows_colon = idx > 0 && tokens[idx - 1].tag == TokenTag::Colon
            && tokens[idx - 1].span.end == token.span.start;
        match name_token {
            Some(name)
                if token.tag == TokenTag::Colon
                    && !follows_colon
                    && name.tag == TokenTag::Word
                    && name.span.start == token.span.end =>
            {
                let position = position_of(&mut order, &name.text);
                out.push_str(&sql[copied..token.span.start]);
                out.push_str(&positional(db_type, position));
                copied = name.span.end;
                if params.get(&name.text).is_none() && !missing.iter().any(|m| m == &name.text) {
                    missing.push(name.text.clone());
                }
                idx += 2;
            }
            _ => idx += 1,
        }
    }
    out.push_str(&sql[copied..]);

    if !missing.is_empty() {
        return Err(GateError::validation(format!(
            "missing value for parameter(s): {}",
            missing.join(", ")
        )));
    }

    let unused: Vec<&str> = params.names().filter(|n| !order.contains(n)).collect();
    if !unused.is_empty() {
        return Err(GateError::validation(format!(
            "parameter(s) not referenced by the statement: {}",
            unused.join(", ")
        )));
    }

    let values = order
        .iter()
        .filter_map(|name| params.get(name).cloned())
        .collect();

    Ok(BoundStatement { sql: out, values })
}

fn position_of<'a>(order: &mut Vec<&'a str>, name: &'a str) -> usize {
    match order.iter().position(|n| *n == name) {
        Some(pos) => pos + 1,
        None => {
            order.push(name);
            order.len()
        }
    }
}

fn positional(db_type: DatabaseType, position: usize) -> String {
    match db_type {
        DatabaseType::PostgreSQL => format!("${}", position),
        DatabaseType::SQLite => format!("?{}", position),
    }
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Json(v) => query.bind(Json(v)),
    }
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        // no native JSON type; arrays and objects travel as text
        QueryParam::Json(v) => query.bind(v.to_string()),
    }
}
