// Copyright 2025
// Licensed under the Elastic License v2.0

use std::fmt;
use std::str::FromStr;

use crate::core::error::SourceError;
use crate::core::gtid::Gtid;

/// Fields the CDC source adds to every row to describe the change itself.
pub const METADATA_FIELDS: &[&str] = &[
    "domain",
    "event_number",
    "event_type",
    "sequence",
    "server_id",
    "timestamp",
];

pub fn is_metadata_field(name: &str) -> bool {
    METADATA_FIELDS.contains(&name)
}

/// Identifies one streamed table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamId {
    pub database: String,
    pub table: String,
}

impl StreamId {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
        }
    }

    /// Parses `database.table`.
    pub fn parse(s: &str) -> Option<Self> {
        let (database, table) = s.trim().split_once('.')?;
        if database.is_empty() || table.is_empty() || table.contains('.') {
            return None;
        }
        Some(Self::new(database, table))
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.table)
    }
}

/// Kind of change a row describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Insert,
    UpdateBefore,
    UpdateAfter,
    Delete,
}

impl RowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowKind::Insert => "insert",
            RowKind::UpdateBefore => "update_before",
            RowKind::UpdateAfter => "update_after",
            RowKind::Delete => "delete",
        }
    }
}

impl FromStr for RowKind {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(RowKind::Insert),
            "update_before" => Ok(RowKind::UpdateBefore),
            "update_after" => Ok(RowKind::UpdateAfter),
            "delete" => Ok(RowKind::Delete),
            other => Err(SourceError::malformed_row(format!(
                "unknown event_type '{}'",
                other
            ))),
        }
    }
}

/// One column of a change row. `None` is SQL NULL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: Option<String>,
}

impl Field {
    pub fn new(name: impl Into<String>, value: Option<String>) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }
}

/// A single row-level change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub kind: RowKind,
    pub gtid: Gtid,
    pub fields: Vec<Field>,
}

impl Row {
    /// Builds a row from the flat field list delivered by the source.
    ///
    /// The GTID and kind come from the metadata fields, which stay in `fields` so
    /// they can still be loaded as columns when metadata is enabled.
    pub fn from_fields(fields: Vec<Field>) -> Result<Self, SourceError> {
        let lookup = |name: &str| -> Result<&str, SourceError> {
            fields
                .iter()
                .find(|f| f.name == name)
                .and_then(|f| f.value.as_deref())
                .ok_or_else(|| SourceError::malformed_row(format!("missing '{}'", name)))
        };
        let number = |name: &str| -> Result<u64, SourceError> {
            let raw = lookup(name)?;
            raw.parse().map_err(|_| {
                SourceError::malformed_row(format!("'{}' is not a number: {}", name, raw))
            })
        };

        let kind: RowKind = lookup("event_type")?.parse()?;
        let domain = u32::try_from(number("domain")?)
            .map_err(|_| SourceError::malformed_row("domain out of range"))?;
        let server_id = u32::try_from(number("server_id")?)
            .map_err(|_| SourceError::malformed_row("server_id out of range"))?;
        let gtid = Gtid::new(domain, server_id, number("sequence")?, number("event_number")?);

        Ok(Self { kind, gtid, fields })
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields that map onto sink columns.
    pub fn mapped_fields(&self, include_metadata: bool) -> impl Iterator<Item = &Field> {
        self.fields
            .iter()
            .filter(move |f| include_metadata || !is_metadata_field(&f.name))
    }

    /// Fields describing table data only, never the change metadata.
    pub fn data_fields(&self) -> impl Iterator<Item = &Field> {
        self.mapped_fields(false)
    }
}

/// Column name and type as reported by the source, used to derive DDL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceField {
    pub name: String,
    pub type_name: String,
}

impl SourceField {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(kind: &str, seq: &str, event: &str) -> Vec<Field> {
        vec![
            Field::new("domain", Some("0".to_string())),
            Field::new("server_id", Some("3000".to_string())),
            Field::new("sequence", Some(seq.to_string())),
            Field::new("event_number", Some(event.to_string())),
            Field::new("event_type", Some(kind.to_string())),
            Field::new("timestamp", Some("1700000000".to_string())),
        ]
    }

    #[test]
    fn test_from_fields() {
        let mut fields = metadata("update_after", "42", "3");
        fields.push(Field::new("id", Some("1".to_string())));
        fields.push(Field::new("name", None));

        let row = Row::from_fields(fields).unwrap();
        assert_eq!(row.kind, RowKind::UpdateAfter);
        assert_eq!(row.gtid, Gtid::new(0, 3000, 42, 3));
        assert_eq!(row.gtid.server_id, 3000);
        assert!(row.field("name").unwrap().is_null());
        assert_eq!(row.fields.len(), 8);
    }

    #[test]
    fn test_from_fields_rejects_missing_metadata() {
        let fields = vec![Field::new("id", Some("1".to_string()))];
        let err = Row::from_fields(fields).unwrap_err();
        assert!(matches!(err, SourceError::MalformedRow(_)));
    }

    #[test]
    fn test_from_fields_rejects_unknown_kind() {
        let err = Row::from_fields(metadata("upsert", "1", "1")).unwrap_err();
        assert!(err.to_string().contains("upsert"));
    }

    #[test]
    fn test_from_fields_rejects_non_numeric_sequence() {
        assert!(Row::from_fields(metadata("insert", "abc", "1")).is_err());
    }

    #[test]
    fn test_mapped_fields_respect_metadata_flag() {
        let mut fields = metadata("insert", "1", "1");
        fields.push(Field::new("id", Some("7".to_string())));
        let row = Row::from_fields(fields).unwrap();

        assert_eq!(row.mapped_fields(true).count(), 7);
        let data: Vec<_> = row.data_fields().map(|f| f.name.as_str()).collect();
        assert_eq!(data, vec!["id"]);
    }

    #[test]
    fn test_stream_id_parse() {
        let id = StreamId::parse("shop.orders").unwrap();
        assert_eq!(id.database, "shop");
        assert_eq!(id.table, "orders");
        assert_eq!(id.to_string(), "shop.orders");

        assert!(StreamId::parse("orders").is_none());
        assert!(StreamId::parse(".orders").is_none());
        assert!(StreamId::parse("a.b.c").is_none());
    }

    #[test]
    fn test_row_kind_round_trip() {
        for kind in [
            RowKind::Insert,
            RowKind::UpdateBefore,
            RowKind::UpdateAfter,
            RowKind::Delete,
        ] {
            assert_eq!(kind.as_str().parse::<RowKind>().unwrap(), kind);
        }
    }
}
