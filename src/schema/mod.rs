// Copyright 2025
// Licensed under the Elastic License v2.0

pub mod ddl;
pub mod transform;

use std::sync::Arc;

use hashbrown::HashMap;
use tracing::debug;

use crate::core::{BulkSink, SchemaError};

/// One column of a sink table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkColumn {
    pub name: String,
    /// 1-based position in the table
    pub position: u32,
    pub data_type: String,
    pub nullable: bool,
    pub default_value: Option<String>,
}

impl SinkColumn {
    pub fn new(name: impl Into<String>, position: u32, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            position,
            data_type: data_type.into(),
            nullable: true,
            default_value: None,
        }
    }
}

/// Column layout of one sink table.
///
/// Column lookups are case-insensitive, matching how the SQL layer of the sink
/// resolves identifiers.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub database: String,
    pub table: String,
    pub columns: Vec<SinkColumn>,
    index: HashMap<String, usize>,
}

impl TableSchema {
    pub fn new(database: impl Into<String>, table: impl Into<String>, mut columns: Vec<SinkColumn>) -> Self {
        columns.sort_by_key(|c| c.position);
        let index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.to_lowercase(), i))
            .collect();

        Self {
            database: database.into(),
            table: table.into(),
            columns,
            index,
        }
    }

    pub fn column(&self, name: &str) -> Option<&SinkColumn> {
        self.index.get(&name.to_lowercase()).map(|&i| &self.columns[i])
    }

    pub fn column_position(&self, name: &str) -> Result<u32, SchemaError> {
        self.column(name)
            .map(|c| c.position)
            .ok_or_else(|| SchemaError::UnknownColumn {
                database: self.database.clone(),
                table: self.table.clone(),
                column: name.to_string(),
            })
    }

    pub fn column_at(&self, position: u32) -> Option<&SinkColumn> {
        self.columns.iter().find(|c| c.position == position)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }
}

/// Caches sink table layouts for a stream controller.
#[derive(Default)]
pub struct SchemaResolver {
    cache: HashMap<(String, String), Arc<TableSchema>>,
}

impl SchemaResolver {
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
        }
    }

    pub async fn resolve(
        &mut self,
        sink: &mut dyn BulkSink,
        database: &str,
        table: &str,
    ) -> Result<Arc<TableSchema>, SchemaError> {
        let key = (database.to_string(), table.to_string());
        if let Some(schema) = self.cache.get(&key) {
            return Ok(schema.clone());
        }

        let schema = Arc::new(sink.table_schema(database, table).await?);
        debug!(
            "Resolved schema for `{}`.`{}`: {} columns",
            database,
            table,
            schema.len()
        );
        self.cache.insert(key, schema.clone());
        Ok(schema)
    }

    /// Drops every cached layout so the next resolve asks the sink again.
    pub fn invalidate(&mut self) {
        self.cache.clear();
    }
}
