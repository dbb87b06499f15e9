// Copyright 2025
// Licensed under the Elastic License v2.0

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::core::error::{SinkError, SourceError};
use crate::core::record::{Row, SourceField, StreamId};
use crate::schema::TableSchema;

/// Result of one read from a CDC source.
#[derive(Debug)]
pub enum ReadOutcome {
    Row(Row),
    /// Nothing arrived within the read timeout.
    Timeout,
    Error(SourceError),
}

/// Cloneable handle that closes a source connection from another task.
///
/// Closing is sticky: once closed, every pending and future read on the
/// connection returns `SourceError::Closed`.
#[derive(Clone)]
pub struct CloseSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CloseSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn close(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `close` has been called.
    pub async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of a committed bulk transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitSummary {
    pub rows_inserted: u64,
    pub execution_time: Duration,
    pub truncation_count: u64,
    pub saturated_count: u64,
    pub invalid_count: u64,
}

/// A change-data-capture feed for one table.
#[async_trait]
pub trait CdcSource: Send {
    /// Returns the name of the source implementation
    fn name(&self) -> &'static str;

    /// Opens a session for `stream`, resuming at a transaction-level position when given.
    async fn connect(&mut self, stream: &StreamId, resume_from: Option<String>)
        -> Result<(), SourceError>;

    /// Reads the next row, waiting at most `timeout`.
    async fn read(&mut self, timeout: Duration) -> ReadOutcome;

    /// Column names and source types of the streamed table, known after connect.
    fn fields(&self) -> Vec<SourceField>;

    /// Handle used by the fleet to unblock a pending read during shutdown.
    fn close_signal(&self) -> CloseSignal;

    /// Closes the session
    async fn close(&mut self);
}

/// Open bulk transaction on one sink table.
#[async_trait]
pub trait BulkWriter: Send {
    /// Sets a column of the row being built. Positions are 1-based.
    fn set_column(&mut self, position: u32, value: &str) -> Result<(), SinkError>;

    fn set_null(&mut self, position: u32) -> Result<(), SinkError>;

    /// Appends the row being built to the transaction buffer.
    fn write_row(&mut self) -> Result<(), SinkError>;

    async fn commit(self: Box<Self>) -> Result<CommitSummary, SinkError>;

    async fn rollback(self: Box<Self>) -> Result<(), SinkError>;
}

/// The analytical store receiving batched rows.
#[async_trait]
pub trait BulkSink: Send {
    /// Returns the name of the sink implementation
    fn name(&self) -> &'static str;

    /// Looks up a table. Missing tables yield `SinkError::TableNotFound`.
    async fn table_schema(&mut self, database: &str, table: &str)
        -> Result<TableSchema, SinkError>;

    async fn open_bulk(&mut self, schema: &TableSchema) -> Result<Box<dyn BulkWriter>, SinkError>;

    /// Runs an administrative statement such as `CREATE TABLE`.
    async fn execute_ddl(&mut self, statement: &str) -> Result<(), SinkError>;

    /// Runs DML statements in one sink transaction.
    async fn execute_transaction(&mut self, statements: &[String])
        -> Result<CommitSummary, SinkError>;

    /// Maps a source column type onto the sink's type name.
    fn map_type(&self, source_type: &str) -> String {
        source_type.to_string()
    }

    /// Table options appended after the column list of a generated `CREATE TABLE`.
    fn create_table_suffix(&self, _first_column: &str) -> String {
        "ENGINE=ColumnStore".to_string()
    }
}

/// Creates the per-table connections. Each controller owns the instances it gets.
#[async_trait]
pub trait Connectors: Send + Sync {
    fn source(&self, stream: &StreamId) -> Box<dyn CdcSource>;

    async fn sink(&self) -> Result<Box<dyn BulkSink>, SinkError>;
}
