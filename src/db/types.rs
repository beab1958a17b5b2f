//! Row value normalisation.
//!
//! Every value leaving the executor is plain JSON: integers and floats as
//! numbers, exact numerics as floats, UUIDs as strings, date and time values
//! as ISO-8601 strings, JSON columns as JSON, and binary data as base64.
//!
//! PostgreSQL values are decoded by declared column type. SQLite values are
//! decoded by the storage class the value actually has, since a SQLite
//! column may hold any class regardless of its declaration; SQLite JSON is
//! plain TEXT and comes back as a string.

use crate::models::DatabaseType;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if lower.contains("decimal") || lower.contains("numeric") {
        // NUMERIC affinity in SQLite stores integers or reals
        if db == DatabaseType::SQLite {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    let integer_like = lower.contains("int") && !lower.contains("interval") && lower != "point";
    if integer_like || lower.contains("serial") {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    match lower.as_str() {
        "timestamptz" | "timestamp with time zone" => TypeCategory::TimestampTz,
        "timestamp" | "timestamp without time zone" => TypeCategory::Timestamp,
        "date" => TypeCategory::Date,
        "time" | "time without time zone" => TypeCategory::Time,
        "text" | "varchar" | "bpchar" | "char" | "name" | "citext" | "character varying" => {
            TypeCategory::Text
        }
        _ => TypeCategory::Unknown,
    }
}

/// Base64 form of binary column data.
pub fn encode_binary(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

/// Positional conversion of a database row to JSON values.
pub trait RowValues {
    fn column_names(&self) -> Vec<String>;
    fn to_json_values(&self) -> Vec<JsonValue>;
}

impl RowValues for PgRow {
    fn column_names(&self) -> Vec<String> {
        self.columns().iter().map(|c| c.name().to_string()).collect()
    }

    fn to_json_values(&self) -> Vec<JsonValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), DatabaseType::PostgreSQL);
                postgres::decode_column(self, idx, category)
            })
            .collect()
    }
}

impl RowValues for SqliteRow {
    fn column_names(&self) -> Vec<String> {
        self.columns().iter().map(|c| c.name().to_string()).collect()
    }

    fn to_json_values(&self) -> Vec<JsonValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| sqlite::decode_column(self, idx, col.type_info().name()))
            .collect()
    }
}

mod postgres {
    use super::*;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
    use rust_decimal::Decimal;
    use rust_decimal::prelude::ToPrimitive;

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => get::<bool>(row, idx).map(JsonValue::Bool),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => get::<Vec<u8>>(row, idx).map(|v| encode_binary(&v)),
            TypeCategory::Json => get::<JsonValue>(row, idx),
            TypeCategory::Uuid => {
                get::<uuid::Uuid>(row, idx).map(|v| JsonValue::String(v.to_string()))
            }
            TypeCategory::Date => {
                get::<NaiveDate>(row, idx).map(|v| JsonValue::String(v.to_string()))
            }
            TypeCategory::Time => {
                get::<NaiveTime>(row, idx).map(|v| JsonValue::String(v.to_string()))
            }
            TypeCategory::Timestamp => get::<NaiveDateTime>(row, idx)
                .map(|v| JsonValue::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
            TypeCategory::TimestampTz => {
                get::<DateTime<Utc>>(row, idx).map(|v| JsonValue::String(v.to_rfc3339()))
            }
            TypeCategory::Text | TypeCategory::Unknown => decode_text(row, idx),
        }
        .unwrap_or(JsonValue::Null)
    }

    fn get<T>(row: &PgRow, idx: usize) -> Option<T>
    where
        T: for<'r> sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
    {
        match row.try_get::<Option<T>, _>(idx) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(column = idx, error = %e, "Failed to decode column");
                None
            }
        }
    }

    fn decode_decimal(row: &PgRow, idx: usize) -> Option<JsonValue> {
        let v = get::<Decimal>(row, idx)?;
        Some(match v.to_f64() {
            Some(f) => float_value(f),
            None => JsonValue::String(v.to_string()),
        })
    }

    fn decode_integer(row: &PgRow, idx: usize) -> Option<JsonValue> {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(|v| JsonValue::Number(v.into()));
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return v.map(|v| JsonValue::Number(v.into()));
        }
        get::<i16>(row, idx).map(|v| JsonValue::Number(v.into()))
    }

    fn decode_float(row: &PgRow, idx: usize) -> Option<JsonValue> {
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v.map(float_value);
        }
        get::<f32>(row, idx).map(|v| float_value(f64::from(v)))
    }

    fn decode_text(row: &PgRow, idx: usize) -> Option<JsonValue> {
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v.map(JsonValue::String);
        }
        // enums and other text-encoded types
        row.try_get_unchecked::<Option<String>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::String)
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(row: &SqliteRow, idx: usize, declared: &str) -> JsonValue {
        let storage = match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => return JsonValue::Null,
            Ok(raw) => raw.type_info().name().to_string(),
            Err(_) => return JsonValue::Null,
        };
        let category = categorize_type(declared, DatabaseType::SQLite);

        match storage.as_str() {
            "INTEGER" if category == TypeCategory::Boolean => row
                .try_get_unchecked::<i64, _>(idx)
                .map(|v| JsonValue::Bool(v != 0))
                .unwrap_or(JsonValue::Null),
            "INTEGER" => row
                .try_get_unchecked::<i64, _>(idx)
                .map(|v| JsonValue::Number(v.into()))
                .unwrap_or(JsonValue::Null),
            "REAL" => row
                .try_get_unchecked::<f64, _>(idx)
                .map(float_value)
                .unwrap_or(JsonValue::Null),
            "BLOB" => row
                .try_get_unchecked::<Vec<u8>, _>(idx)
                .map(|v| encode_binary(&v))
                .unwrap_or(JsonValue::Null),
            _ => row
                .try_get_unchecked::<String, _>(idx)
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
        }
    }
}
