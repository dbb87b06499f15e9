// Copyright 2025
// Licensed under the Elastic License v2.0

//! `CREATE TABLE` derivation from the field list reported by the CDC source.

use crate::core::{is_metadata_field, BulkSink, SinkError, SourceField, StreamId};
use crate::utils::quote_identifier;

/// Builds the statement creating the sink table for `stream`.
///
/// Metadata fields are only included when they are also loaded as columns.
pub fn create_table_statement(
    sink: &dyn BulkSink,
    stream: &StreamId,
    fields: &[SourceField],
    include_metadata: bool,
) -> Result<String, SinkError> {
    let quote = |name: &str| quote_identifier(name).map_err(|e| SinkError::statement(e.to_string()));
    let database = quote(&stream.database)?;
    let table = quote(&stream.table)?;

    let mut col_defs = Vec::with_capacity(fields.len());
    for field in fields {
        if !include_metadata && is_metadata_field(&field.name) {
            continue;
        }
        col_defs.push(format!("{} {}", quote(&field.name)?, column_type(sink, &field.type_name)));
    }

    let first_column = fields
        .iter()
        .find(|f| include_metadata || !is_metadata_field(&f.name))
        .map(|f| f.name.as_str())
        .ok_or_else(|| {
            SinkError::statement(format!("source reported no columns for {}", stream))
        })?;

    Ok(format!(
        "CREATE TABLE {}.{} ({}) {}",
        database,
        table,
        col_defs.join(", "),
        sink.create_table_suffix(first_column),
    ))
}

/// Sink column type for a source type name.
fn column_type(sink: &dyn BulkSink, source_type: &str) -> String {
    let normalized = source_type.trim();
    if normalized.eq_ignore_ascii_case("serial") {
        // SERIAL is an alias the bulk sinks do not accept
        format!("{} NOT NULL", sink.map_type("bigint unsigned"))
    } else {
        sink.map_type(normalized)
    }
}
