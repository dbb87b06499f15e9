// Copyright 2025
// Licensed under the Elastic License v2.0

//! Error types shared by the loader core.
//!
//! Every error is scoped to the stream controller that raised it. A read timeout
//! is not an error: it is reported as `ReadOutcome::Timeout`.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a CDC source connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The session could not be established. Fatal for the table.
    #[error("Connection error: {0}")]
    Connect(String),

    /// Reading from an established session failed.
    #[error("Read error: {0}")]
    Read(String),

    /// The connection was closed, usually by the fleet during shutdown.
    #[error("Connection closed")]
    Closed,

    /// A record did not carry usable change metadata.
    #[error("Malformed row: {0}")]
    MalformedRow(String),
}

impl SourceError {
    pub fn connect(msg: impl Into<String>) -> Self {
        Self::Connect(msg.into())
    }

    pub fn read(msg: impl Into<String>) -> Self {
        Self::Read(msg.into())
    }

    pub fn malformed_row(msg: impl Into<String>) -> Self {
        Self::MalformedRow(msg.into())
    }
}

/// Errors raised by the bulk sink.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("Sink connection error: {0}")]
    Connection(String),

    /// Committing or staging bulk data failed.
    #[error("Bulk load failed: {0}")]
    Load(String),

    /// A DDL or DML statement was rejected.
    #[error("Statement failed: {0}")]
    Statement(String),

    /// The target table does not exist.
    #[error("Table `{database}`.`{table}` not found")]
    TableNotFound { database: String, table: String },
}

impl SinkError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn load(msg: impl Into<String>) -> Self {
        Self::Load(msg.into())
    }

    pub fn statement(msg: impl Into<String>) -> Self {
        Self::Statement(msg.into())
    }
}

/// Errors raised while mapping rows onto a sink table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// Recoverable through table creation.
    #[error("Table `{database}`.`{table}` not found in sink")]
    TableNotFound { database: String, table: String },

    /// The row carries a column the sink table does not have.
    #[error("Column `{column}` does not exist in `{database}`.`{table}`")]
    UnknownColumn {
        database: String,
        table: String,
        column: String,
    },

    #[error(transparent)]
    Sink(SinkError),
}

impl From<SinkError> for SchemaError {
    fn from(e: SinkError) -> Self {
        match e {
            SinkError::TableNotFound { database, table } => {
                SchemaError::TableNotFound { database, table }
            }
            other => SchemaError::Sink(other),
        }
    }
}

/// Errors raised by the checkpoint store.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// I/O failure other than "no checkpoint yet".
    #[error("Checkpoint unavailable at {path}: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed checkpoint: '{value}'")]
    Malformed { value: String },
}

/// Errors raised while applying or flushing a batch.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Sink(SinkError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

impl From<SinkError> for BatchError {
    fn from(e: SinkError) -> Self {
        match e {
            SinkError::TableNotFound { .. } => BatchError::Schema(e.into()),
            other => BatchError::Sink(other),
        }
    }
}

impl BatchError {
    /// True when the failure can be fixed by creating the sink table.
    pub fn is_table_not_found(&self) -> bool {
        matches!(self, BatchError::Schema(SchemaError::TableNotFound { .. }))
    }
}
