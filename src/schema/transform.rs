// Copyright 2025
// Licensed under the Elastic License v2.0

//! Row-to-DML transformation used when rows are applied as SQL statements
//! instead of being appended in bulk. Metadata fields never reach the SQL.

use crate::core::{Field, Row, SinkError, StreamId};
use crate::utils::{quote_identifier as quote, quote_literal};

pub fn insert_statement(stream: &StreamId, row: &Row) -> Result<String, SinkError> {
    let fields: Vec<&Field> = row.data_fields().collect();
    if fields.is_empty() {
        return Err(SinkError::statement(format!(
            "row at {} has no data columns",
            row.gtid
        )));
    }

    let mut columns = Vec::with_capacity(fields.len());
    let mut values = Vec::with_capacity(fields.len());
    for field in fields {
        columns.push(quote_identifier(&field.name)?);
        values.push(quote_literal(field.value.as_deref()));
    }

    Ok(format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table_name(stream)?,
        columns.join(", "),
        values.join(", ")
    ))
}

pub fn delete_statement(stream: &StreamId, row: &Row) -> Result<String, SinkError> {
    Ok(format!(
        "DELETE FROM {} WHERE {}",
        table_name(stream)?,
        where_clause(row)?
    ))
}

/// `UPDATE` setting the after-image on rows matching the before-image.
pub fn update_statement(stream: &StreamId, before: &Row, after: &Row) -> Result<String, SinkError> {
    let assignments = after
        .data_fields()
        .map(|f| {
            Ok(format!(
                "{} = {}",
                quote_identifier(&f.name)?,
                quote_literal(f.value.as_deref())
            ))
        })
        .collect::<Result<Vec<_>, SinkError>>()?;
    if assignments.is_empty() {
        return Err(SinkError::statement(format!(
            "row at {} has no data columns",
            after.gtid
        )));
    }

    Ok(format!(
        "UPDATE {} SET {} WHERE {}",
        table_name(stream)?,
        assignments.join(", "),
        where_clause(before)?
    ))
}

fn where_clause(row: &Row) -> Result<String, SinkError> {
    let predicates = row
        .data_fields()
        .map(|f| {
            let column = quote_identifier(&f.name)?;
            Ok(if f.is_null() {
                format!("{} IS NULL", column)
            } else {
                format!("{} = {}", column, quote_literal(f.value.as_deref()))
            })
        })
        .collect::<Result<Vec<_>, SinkError>>()?;

    if predicates.is_empty() {
        return Err(SinkError::statement(format!(
            "row at {} has no data columns to match on",
            row.gtid
        )));
    }
    Ok(predicates.join(" AND "))
}

fn table_name(stream: &StreamId) -> Result<String, SinkError> {
    Ok(format!(
        "{}.{}",
        quote_identifier(&stream.database)?,
        quote_identifier(&stream.table)?
    ))
}

fn quote_identifier(name: &str) -> Result<String, SinkError> {
    quote(name).map_err(|e| SinkError::statement(e.to_string()))
}
