// Copyright 2025
// Licensed under the Elastic License v2.0

//! StarRocks Type Mappings
//!
//! Maps the column types reported by the CDC source (MariaDB/MySQL names such
//! as `varchar(64)` or `int unsigned`, or plain Avro names such as `long`)
//! onto StarRocks column types for generated tables.
//!
//! ## Mapping Strategy
//!
//! - Unsigned integers widen to the next signed type
//! - DECIMAL precision is capped at 38
//! - Types StarRocks lacks (TIME, ENUM, SET) become STRING
//! - Anything unknown falls back to STRING

/// Type mapper for converting source type names to StarRocks types.
#[derive(Debug, Clone)]
pub struct TypeMapper {
    /// Used for DECIMAL without precision
    default_decimal_precision: u8,
    default_decimal_scale: u8,
}

impl TypeMapper {
    pub fn new() -> Self {
        Self {
            default_decimal_precision: 38,
            default_decimal_scale: 9,
        }
    }

    /// Converts a source type name such as `decimal(10,2) unsigned` to a StarRocks type.
    pub fn to_starrocks_type(&self, source_type: &str) -> String {
        let lowered = source_type.trim().to_lowercase();
        let unsigned = lowered.contains("unsigned");
        let (base, args) = match lowered.split_once('(') {
            Some((base, rest)) => (base.trim(), rest.split(')').next().map(str::trim)),
            None => (
                lowered.split_whitespace().next().unwrap_or_default(),
                None,
            ),
        };

        match base {
            "bool" | "boolean" => "BOOLEAN".to_string(),
            "tinyint" if unsigned => "SMALLINT".to_string(),
            "tinyint" => "TINYINT".to_string(),
            "smallint" | "year" if unsigned => "INT".to_string(),
            "smallint" | "year" => "SMALLINT".to_string(),
            "mediumint" => "INT".to_string(),
            "int" | "integer" if unsigned => "BIGINT".to_string(),
            "int" | "integer" => "INT".to_string(),
            "bigint" if unsigned => "LARGEINT".to_string(),
            "bigint" | "long" => "BIGINT".to_string(),
            "bit" => "BIGINT".to_string(),
            "float" => "FLOAT".to_string(),
            "double" | "real" => "DOUBLE".to_string(),
            "decimal" | "numeric" | "dec" | "fixed" => self.decimal(args),
            "char" => match args.and_then(|a| a.parse::<u32>().ok()) {
                Some(len) if len <= 255 => format!("CHAR({})", len.max(1)),
                _ => "STRING".to_string(),
            },
            "varchar" => match args.and_then(|a| a.parse::<u32>().ok()) {
                // StarRocks VARCHAR length is in bytes
                Some(len) if len > 0 && len <= 1_048_576 / 4 => format!("VARCHAR({})", len * 4),
                _ => "STRING".to_string(),
            },
            "tinytext" | "text" | "mediumtext" | "longtext" | "string" | "enum" | "set" => {
                "STRING".to_string()
            }
            "json" => "JSON".to_string(),
            "binary" | "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob" | "bytes" => {
                "VARBINARY".to_string()
            }
            "date" => "DATE".to_string(),
            "datetime" | "timestamp" => "DATETIME".to_string(),
            // StarRocks doesn't have TIME type
            "time" => "STRING".to_string(),
            _ => "STRING".to_string(),
        }
    }

    fn decimal(&self, args: Option<&str>) -> String {
        let mut parts = args
            .unwrap_or_default()
            .split(',')
            .map(|p| p.trim().parse::<u8>().ok());
        let precision = parts
            .next()
            .flatten()
            .unwrap_or(self.default_decimal_precision)
            .clamp(1, 38);
        let scale = match parts.next() {
            Some(Some(scale)) => scale,
            Some(None) => self.default_decimal_scale,
            None if args.is_some() => 0,
            None => self.default_decimal_scale,
        }
        .min(precision);
        format!("DECIMAL({},{})", precision, scale)
    }
}

impl Default for TypeMapper {
    fn default() -> Self {
        Self::new()
    }
}
