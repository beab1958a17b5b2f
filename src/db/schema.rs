//! Schema introspection queries.
//!
//! Reads table and column descriptions from the system catalog only, never
//! from user tables. Callers go through the
//! [`SchemaCatalog`](crate::db::catalog::SchemaCatalog) cache.
//!
//! # Architecture
//!
//! SQL lives in the `queries` submodule with constants per database type.
//! Each backend returns flat `(schema, table, column, type, nullable)` rows
//! in catalog order, which are grouped into descriptors here.

use crate::db::pool::DbPool;
use crate::error::{GateError, GateResult};
use crate::models::{ColumnDescriptor, SchemaDescriptor, TableDescriptor};
use tracing::debug;

/// One column as read from the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CatalogRow {
    schema: String,
    table: String,
    column: ColumnDescriptor,
}

/// Catalog reader; see the module docs.
pub(crate) struct SchemaInspector;

impl SchemaInspector {
    /// Describe every table and view, optionally restricted to one schema.
    pub(crate) async fn describe(
        pool: &DbPool,
        schema: Option<&str>,
    ) -> GateResult<SchemaDescriptor> {
        let rows = match pool {
            DbPool::Postgres(p) => postgres::fetch_columns(p, schema).await,
            DbPool::SQLite(p) => sqlite::fetch_columns(p, schema).await,
        }
        .map_err(GateError::from_execution)?;

        let descriptor = group_rows(rows);
        debug!(
            schema = schema.unwrap_or("*"),
            tables = descriptor.tables.len(),
            "Read schema from catalog"
        );
        Ok(descriptor)
    }
}

fn group_rows(rows: Vec<CatalogRow>) -> SchemaDescriptor {
    let mut tables: Vec<TableDescriptor> = Vec::new();
    for row in rows {
        if let Some(last) = tables
            .last_mut()
            .filter(|t| t.schema == row.schema && t.table == row.table)
        {
            last.columns.push(row.column);
            continue;
        }
        tables.push(TableDescriptor::new(row.schema, row.table).with_column(row.column));
    }
    SchemaDescriptor {
        tables,
        truncated: false,
    }
}

// =============================================================================
// SQL Query Templates
// =============================================================================

mod queries {
    pub mod postgres {
        pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            n.nspname::text AS table_schema,
            c.relname::text AS table_name,
            a.attname::text AS column_name,
            format_type(a.atttypid, a.atttypmod) AS column_type,
            NOT a.attnotnull AS is_nullable
        FROM pg_class c
        JOIN pg_namespace n ON n.oid = c.relnamespace
        JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum > 0 AND NOT a.attisdropped
        WHERE c.relkind IN ('r', 'p', 'v', 'm', 'f')
        AND n.nspname NOT IN ('pg_catalog', 'information_schema')
        AND n.nspname NOT LIKE 'pg_toast%'
        AND n.nspname NOT LIKE 'pg_temp%'
        AND ($1::text IS NULL OR n.nspname = $1)
        ORDER BY n.nspname, c.relname, a.attnum
        "#;
    }

    pub mod sqlite {
        pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            m.name AS table_name,
            p.name AS column_name,
            p.type AS column_type,
            p."notnull" AS not_null
        FROM sqlite_master m
        JOIN pragma_table_info(m.name) p
        WHERE m.type IN ('table', 'view')
        AND m.name NOT LIKE 'sqlite_%'
        ORDER BY m.name, p.cid
        "#;
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================

mod postgres {
    use super::*;
    use sqlx::{PgPool, Row};

    pub async fn fetch_columns(
        pool: &PgPool,
        schema: Option<&str>,
    ) -> Result<Vec<CatalogRow>, sqlx::Error> {
        let rows = sqlx::query(queries::postgres::DESCRIBE_COLUMNS)
            .bind(schema)
            .fetch_all(pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<CatalogRow, sqlx::Error> {
                Ok(CatalogRow {
                    schema: row.try_get("table_schema")?,
                    table: row.try_get("table_name")?,
                    column: ColumnDescriptor::new(
                        row.try_get::<String, _>("column_name")?,
                        row.try_get::<String, _>("column_type")?,
                        row.try_get::<bool, _>("is_nullable")?,
                    ),
                })
            })
            .collect()
    }
}

mod sqlite {
    use super::*;
    use crate::models::DatabaseType;
    use sqlx::{Row, SqlitePool};

    /// Only the `main` database is described; any other schema name yields an
    /// empty result.
    pub async fn fetch_columns(
        pool: &SqlitePool,
        schema: Option<&str>,
    ) -> Result<Vec<CatalogRow>, sqlx::Error> {
        let main = DatabaseType::SQLite.default_schema();
        if schema.is_some_and(|s| s != main) {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(queries::sqlite::DESCRIBE_COLUMNS)
            .fetch_all(pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<CatalogRow, sqlx::Error> {
                Ok(CatalogRow {
                    schema: main.to_string(),
                    table: row.try_get("table_name")?,
                    column: ColumnDescriptor::new(
                        row.try_get::<String, _>("column_name")?,
                        row.try_get::<String, _>("column_type")?,
                        row.try_get::<i64, _>("not_null")? == 0,
                    ),
                })
            })
            .collect()
    }
}
