//! Schema introspection tool.
//!
//! This module implements the `describe_schema` MCP tool on top of the
//! shared [`SchemaCatalog`] cache.

use crate::db::{CatalogSnapshot, SchemaCatalog};
use crate::error::GateResult;
use crate::models::TableDescriptor;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Input for the describe_schema tool.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct DescribeSchemaInput {
    /// Schema name to describe. Omit for every visible schema. SQLite only has "main".
    #[serde(default)]
    pub schema: Option<String>,
    /// Discard the cached description and read the catalog again. Default: false
    #[serde(default)]
    pub refresh: bool,
}

/// Output from the describe_schema tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct DescribeSchemaOutput {
    pub tables: Vec<TableDescriptor>,
    /// True if table or column caps dropped entries
    pub truncated: bool,
    /// One line per table: `schema.table (column:type, ...)`
    pub text: String,
    /// When the catalog was read (RFC 3339)
    pub cached_at: String,
}

impl From<CatalogSnapshot> for DescribeSchemaOutput {
    fn from(snapshot: CatalogSnapshot) -> Self {
        Self {
            tables: snapshot.schema.tables.clone(),
            truncated: snapshot.schema.truncated,
            text: snapshot.schema.render_text(),
            cached_at: snapshot.cached_at.to_rfc3339(),
        }
    }
}

/// Handler for schema description.
#[derive(Debug, Clone)]
pub struct SchemaToolHandler {
    catalog: Arc<SchemaCatalog>,
}

impl SchemaToolHandler {
    pub fn new(catalog: Arc<SchemaCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Arc<SchemaCatalog> {
        &self.catalog
    }

    /// Handle the describe_schema tool call.
    pub async fn describe_schema(
        &self,
        input: DescribeSchemaInput,
    ) -> GateResult<DescribeSchemaOutput> {
        let schema = input
            .schema
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let snapshot = if input.refresh {
            self.catalog.refresh(schema).await?
        } else {
            self.catalog.describe(schema).await?
        };

        info!(
            schema = schema.unwrap_or("*"),
            tables = snapshot.schema.tables.len(),
            refresh = input.refresh,
            "Schema described"
        );
        Ok(snapshot.into())
    }
}
