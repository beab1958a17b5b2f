//! Schema-related data models.
//!
//! This module defines the descriptors produced by schema introspection.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Declared type as reported by the catalog
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TableDescriptor {
    /// Schema (namespace) name. `main` for SQLite.
    pub schema: String,
    pub table: String,
    pub columns: Vec<ColumnDescriptor>,
}

impl TableDescriptor {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            columns: Vec::new(),
        }
    }

    pub fn with_column(mut self, column: ColumnDescriptor) -> Self {
        self.columns.push(column);
        self
    }
}

/// Ordered description of the tables visible to the gate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SchemaDescriptor {
    pub tables: Vec<TableDescriptor>,
    /// True if the table or column caps dropped entries
    pub truncated: bool,
}

impl SchemaDescriptor {
    /// Apply table and per-table column caps, preserving order.
    pub fn capped(mut self, max_tables: usize, max_columns: usize) -> Self {
        if self.tables.len() > max_tables {
            self.tables.truncate(max_tables);
            self.truncated = true;
        }
        for table in &mut self.tables {
            if table.columns.len() > max_columns {
                table.columns.truncate(max_columns);
                self.truncated = true;
            }
        }
        self
    }

    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.iter().find(|t| t.table == name)
    }

    /// Compact one-line-per-table form for prompt context.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for table in &self.tables {
            let columns = table
                .columns
                .iter()
                .map(|c| format!("{}:{}", c.name, c.data_type))
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!("{}.{} ({})\n", table.schema, table.table, columns));
        }
        out
    }
}
