// Copyright 2025
// Licensed under the Elastic License v2.0

//! SQL text helpers shared by DDL generation, row transformation and the sink.

use anyhow::{anyhow, Result};

/// Validates that a SQL identifier (database, table or column name) contains
/// only safe characters before it is interpolated into a statement.
///
/// Accepted: letters, digits, underscores, dots and single hyphens. Comment
/// markers, statement separators, quotes and backslashes are rejected.
pub fn validate_sql_identifier(name: &str) -> Result<&str> {
    if name.is_empty() {
        return Err(anyhow!("SQL identifier cannot be empty"));
    }

    if name.contains("--") || name.contains("/*") || name.contains("*/") {
        return Err(anyhow!(
            "Invalid SQL identifier '{}': contains SQL comment patterns",
            name
        ));
    }

    if name.contains(';') || name.contains('\'') || name.contains('\\') || name.contains('`') {
        return Err(anyhow!(
            "Invalid SQL identifier '{}': contains SQL injection characters",
            name
        ));
    }

    let is_valid = name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '.' || c == '-');

    if !is_valid {
        return Err(anyhow!(
            "Invalid SQL identifier '{}': contains unsafe characters. \
            Only alphanumeric, underscore, dot and hyphen are allowed",
            name
        ));
    }

    Ok(name)
}

/// Back-quotes a validated identifier.
pub fn quote_identifier(name: &str) -> Result<String> {
    validate_sql_identifier(name)?;
    Ok(format!("`{}`", name))
}

/// Renders a value as a SQL string literal, or `NULL`.
pub fn quote_literal(value: Option<&str>) -> String {
    match value {
        Some(v) => format!("'{}'", v.replace('\\', "\\\\").replace('\'', "\\'")),
        None => "NULL".to_string(),
    }
}
