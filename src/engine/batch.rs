// Copyright 2025
// Licensed under the Elastic License v2.0

//! Sink-side transaction accumulating the rows of one stream between commits.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::core::{
    BatchError, BulkSink, BulkWriter, CommitSummary, Gtid, Row, RowKind, StreamId,
};
use crate::schema::{transform, TableSchema};
use crate::state_store::StateStore;

/// Flush thresholds for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_rows: usize,
    pub max_age: Duration,
}

/// How rows reach the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// Rows are appended to a bulk transaction, metadata columns included when enabled.
    Bulk { include_metadata: bool },
    /// Rows become DML statements run in one sink transaction.
    Transform,
}

enum Handle {
    Bulk(Box<dyn BulkWriter>),
    Statements(Vec<String>),
}

pub struct BatchTransaction {
    stream: StreamId,
    store: StateStore,
    limits: BatchLimits,
    mode: ApplyMode,
    handle: Option<Handle>,
    schema: Option<Arc<TableSchema>>,
    rows_in_batch: usize,
    transactions_in_batch: usize,
    opened_at: Instant,
    last_gtid: Option<Gtid>,
    /// Before-image waiting for its after-image. Never split from it by a flush.
    held_before: Option<Row>,
}

impl BatchTransaction {
    pub fn new(stream: StreamId, store: StateStore, limits: BatchLimits, mode: ApplyMode) -> Self {
        Self {
            stream,
            store,
            limits,
            mode,
            handle: None,
            schema: None,
            rows_in_batch: 0,
            transactions_in_batch: 0,
            opened_at: Instant::now(),
            last_gtid: None,
            held_before: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn rows(&self) -> usize {
        self.rows_in_batch
    }

    pub fn transactions(&self) -> usize {
        self.transactions_in_batch
    }

    pub fn has_pending_update(&self) -> bool {
        self.held_before.is_some()
    }

    /// Starts a new sink transaction against `schema`.
    pub async fn open(
        &mut self,
        sink: &mut dyn BulkSink,
        schema: Arc<TableSchema>,
    ) -> Result<(), BatchError> {
        let handle = match self.mode {
            ApplyMode::Bulk { .. } => Handle::Bulk(sink.open_bulk(&schema).await?),
            ApplyMode::Transform => Handle::Statements(Vec::new()),
        };
        debug!("Opened {} transaction on {}", sink.name(), self.stream);

        self.handle = Some(handle);
        self.schema = Some(schema);
        self.rows_in_batch = 0;
        self.transactions_in_batch = 0;
        self.opened_at = Instant::now();
        Ok(())
    }

    /// Adds one change to the open transaction.
    ///
    /// A before-image is held back until its after-image arrives and both are
    /// applied together.
    pub fn apply_row(&mut self, row: Row) -> Result<(), BatchError> {
        match row.kind {
            RowKind::UpdateBefore => {
                if let Some(orphan) = self.held_before.replace(row) {
                    warn!(
                        "update_before at {} was not followed by update_after",
                        orphan.gtid
                    );
                    self.apply_orphan_before(orphan)?;
                }
                Ok(())
            }
            RowKind::UpdateAfter => match self.held_before.take() {
                Some(before) => self.apply_update(before, row),
                None => {
                    warn!("update_after at {} arrived without update_before", row.gtid);
                    self.apply_orphan_after(row)
                }
            },
            RowKind::Insert | RowKind::Delete => {
                if let Some(orphan) = self.held_before.take() {
                    warn!(
                        "update_before at {} was not followed by update_after",
                        orphan.gtid
                    );
                    self.apply_orphan_before(orphan)?;
                }
                self.apply_single(&row)
            }
        }
    }

    /// True once the row or age threshold is reached. Never splits an update pair.
    pub fn should_flush(&self) -> bool {
        if !self.is_open() || self.rows_in_batch == 0 || self.held_before.is_some() {
            return false;
        }
        self.rows_in_batch >= self.limits.max_rows || self.opened_at.elapsed() >= self.limits.max_age
    }

    /// Commits the transaction and records the last applied GTID as the checkpoint.
    ///
    /// With `reconnect` a fresh transaction is opened right away, otherwise the
    /// sink transaction is released until the next row arrives.
    pub async fn flush(
        &mut self,
        sink: &mut dyn BulkSink,
        reconnect: bool,
    ) -> Result<CommitSummary, BatchError> {
        let Some(handle) = self.handle.take() else {
            return Ok(CommitSummary::default());
        };

        let summary = match handle {
            Handle::Bulk(writer) => writer.commit().await?,
            Handle::Statements(statements) => {
                if statements.is_empty() {
                    CommitSummary::default()
                } else {
                    sink.execute_transaction(&statements).await?
                }
            }
        };

        if let Some(gtid) = self.last_gtid {
            self.store.save_checkpoint(&self.stream, &gtid).await?;
        }

        info!(
            "Rows: {}, Transactions: {}, Load time: {:.3}s, Last GTID: {}",
            summary.rows_inserted,
            self.transactions(),
            summary.execution_time.as_secs_f64(),
            self.last_gtid.map(|g| g.to_string()).unwrap_or_default(),
        );
        if summary.truncation_count > 0 || summary.saturated_count > 0 || summary.invalid_count > 0 {
            warn!(
                "Truncated values: {}, Saturated values: {}, Invalid values: {}",
                summary.truncation_count, summary.saturated_count, summary.invalid_count
            );
        }

        self.rows_in_batch = 0;
        self.transactions_in_batch = 0;

        if reconnect {
            if let Some(schema) = self.schema.clone() {
                self.open(sink, schema).await?;
            }
        }

        Ok(summary)
    }

    /// Releases an open transaction that holds no rows without committing it.
    pub async fn close_empty(&mut self) {
        if self.rows_in_batch > 0 {
            return;
        }
        if let Some(Handle::Bulk(writer)) = self.handle.take() {
            if let Err(e) = writer.rollback().await {
                warn!("Failed to release idle transaction on {}: {}", self.stream, e);
            }
        }
        debug!("Closed idle transaction on {}", self.stream);
    }

    /// Rolls back unflushed rows. They are delivered again on resume.
    pub async fn abort(&mut self) {
        self.held_before = None;
        let Some(handle) = self.handle.take() else {
            return;
        };

        if self.rows_in_batch > 0 {
            warn!(
                "Rolling back {} uncommitted rows on {}",
                self.rows_in_batch, self.stream
            );
        }
        if let Handle::Bulk(writer) = handle {
            if let Err(e) = writer.rollback().await {
                warn!("Rollback failed on {}: {}", self.stream, e);
            }
        }
        self.rows_in_batch = 0;
        self.transactions_in_batch = 0;
    }

    fn apply_update(&mut self, before: Row, after: Row) -> Result<(), BatchError> {
        match self.mode {
            ApplyMode::Bulk { .. } => {
                self.append(&before)?;
                self.append(&after)
            }
            ApplyMode::Transform => {
                self.check_columns(&after)?;
                let statement = transform::update_statement(&self.stream, &before, &after)?;
                self.push_statement(statement, &after.gtid)
            }
        }
    }

    fn apply_single(&mut self, row: &Row) -> Result<(), BatchError> {
        match self.mode {
            ApplyMode::Bulk { .. } => self.append(row),
            ApplyMode::Transform => {
                self.check_columns(row)?;
                let statement = match row.kind {
                    RowKind::Delete => transform::delete_statement(&self.stream, row)?,
                    _ => transform::insert_statement(&self.stream, row)?,
                };
                self.push_statement(statement, &row.gtid)
            }
        }
    }

    fn apply_orphan_before(&mut self, before: Row) -> Result<(), BatchError> {
        match self.mode {
            ApplyMode::Bulk { .. } => self.append(&before),
            // a lone before-image has no DML equivalent
            ApplyMode::Transform => Ok(()),
        }
    }

    fn apply_orphan_after(&mut self, after: Row) -> Result<(), BatchError> {
        match self.mode {
            ApplyMode::Bulk { .. } => self.append(&after),
            // without the before-image the old row cannot be matched
            ApplyMode::Transform => Ok(()),
        }
    }

    fn append(&mut self, row: &Row) -> Result<(), BatchError> {
        let include_metadata = matches!(self.mode, ApplyMode::Bulk { include_metadata: true });
        let schema = self.schema()?;
        let positions = row
            .mapped_fields(include_metadata)
            .map(|f| Ok((schema.column_position(&f.name)?, f.value.as_deref())))
            .collect::<Result<Vec<_>, BatchError>>()?;

        let Some(Handle::Bulk(writer)) = self.handle.as_mut() else {
            return Err(self.not_open());
        };
        for (position, value) in positions {
            match value {
                Some(v) => writer.set_column(position, v)?,
                None => writer.set_null(position)?,
            }
        }
        writer.write_row()?;

        self.count_row(&row.gtid);
        Ok(())
    }

    fn push_statement(&mut self, statement: String, gtid: &Gtid) -> Result<(), BatchError> {
        let Some(Handle::Statements(statements)) = self.handle.as_mut() else {
            return Err(self.not_open());
        };
        statements.push(statement);
        self.count_row(gtid);
        Ok(())
    }

    fn check_columns(&self, row: &Row) -> Result<(), BatchError> {
        let schema = self.schema()?;
        for field in row.data_fields() {
            schema.column_position(&field.name)?;
        }
        Ok(())
    }

    fn count_row(&mut self, gtid: &Gtid) {
        if self.rows_in_batch > 0 {
            if let Some(last) = self.last_gtid {
                if !last.same_transaction(gtid) {
                    self.transactions_in_batch += 1;
                }
            }
        }
        self.rows_in_batch += 1;
        self.last_gtid = Some(*gtid);
    }

    fn schema(&self) -> Result<Arc<TableSchema>, BatchError> {
        self.schema.clone().ok_or_else(|| self.not_open())
    }

    fn not_open(&self) -> BatchError {
        BatchError::Sink(crate::core::SinkError::load(format!(
            "no open transaction on {}",
            self.stream
        )))
    }
}
