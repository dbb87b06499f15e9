// Copyright 2025
// Licensed under the Elastic License v2.0

//! Per-table state machine: connect, resume, stream, recover from a missing
//! sink table, and stop.

use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::core::{
    BatchError, BulkSink, CdcSource, CheckpointError, Gtid, ReadOutcome, ResumeGranularity,
    Row, RowKind, SinkError, SourceError, StreamId,
};
use crate::engine::batch::{ApplyMode, BatchLimits, BatchTransaction};
use crate::schema::{ddl, SchemaResolver};
use crate::state_store::StateStore;

/// Behaviour shared by every stream controller of a fleet.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub limits: BatchLimits,
    /// Read timeout; a timeout with pending rows triggers an idle flush.
    pub idle_flush: Duration,
    pub include_metadata: bool,
    pub auto_create: bool,
    pub transform: bool,
    pub granularity: ResumeGranularity,
}

impl StreamSettings {
    fn apply_mode(&self) -> ApplyMode {
        if self.transform {
            ApplyMode::Transform
        } else {
            ApplyMode::Bulk {
                include_metadata: self.include_metadata,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Connecting,
    Resuming,
    Streaming,
    Recovering,
    Stopped,
    Failed,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControllerState::Connecting => "connecting",
            ControllerState::Resuming => "resuming",
            ControllerState::Streaming => "streaming",
            ControllerState::Recovering => "recovering",
            ControllerState::Stopped => "stopped",
            ControllerState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How a controller ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Stopped,
    Failed(String),
}

impl StreamOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, StreamOutcome::Failed(_))
    }

    pub fn failure(&self) -> Option<&str> {
        match self {
            StreamOutcome::Failed(reason) => Some(reason),
            StreamOutcome::Stopped => None,
        }
    }
}

/// Reasons a controller ends in `Failed`.
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Failed to connect: {0}")]
    Connect(SourceError),

    #[error("Failed to read row: {0}")]
    Read(SourceError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    /// The sink table is missing and could not be created.
    #[error("Table {stream} does not exist: {reason}. Create it with: {statement}")]
    TableMissing {
        stream: StreamId,
        reason: String,
        statement: String,
    },

    #[error("Table {stream} does not exist and no CREATE TABLE could be derived: {source}")]
    NoCreateStatement {
        stream: StreamId,
        #[source]
        source: SinkError,
    },
}

/// Resume filter applied to the first rows delivered after reconnecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resume {
    /// Discard rows older than the checkpoint.
    Seeking(Gtid),
    /// A before-image was skipped; its after-image is skipped too.
    SkippingAfterImage(Gtid),
    Done,
}

pub struct StreamController {
    stream: StreamId,
    settings: StreamSettings,
    source: Box<dyn CdcSource>,
    sink: Box<dyn BulkSink>,
    store: StateStore,
    resolver: SchemaResolver,
    batch: BatchTransaction,
    shutdown: watch::Receiver<bool>,
    state: ControllerState,
    checkpoint: Gtid,
    /// Set once a CREATE TABLE ran; cleared by the next successful commit.
    table_created: bool,
}

impl StreamController {
    pub fn new(
        stream: StreamId,
        settings: StreamSettings,
        source: Box<dyn CdcSource>,
        sink: Box<dyn BulkSink>,
        store: StateStore,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let batch = BatchTransaction::new(
            stream.clone(),
            store.clone(),
            settings.limits,
            settings.apply_mode(),
        );

        Self {
            stream,
            settings,
            source,
            sink,
            store,
            resolver: SchemaResolver::new(),
            batch,
            shutdown,
            state: ControllerState::Connecting,
            checkpoint: Gtid::default(),
            table_created: false,
        }
    }

    /// Drives the stream until it stops or fails.
    pub async fn run(mut self) -> StreamOutcome {
        let outcome = loop {
            let step = match self.state {
                ControllerState::Connecting => self.connect().await,
                ControllerState::Resuming | ControllerState::Streaming => self.stream_rows().await,
                ControllerState::Recovering => self.recover().await,
                ControllerState::Stopped => break StreamOutcome::Stopped,
                ControllerState::Failed => {
                    break StreamOutcome::Failed("controller failed".to_string())
                }
            };

            match step {
                Ok(next) => {
                    if next != self.state {
                        debug!("{} -> {}", self.state, next);
                    }
                    self.state = next;
                }
                Err(e) => {
                    error!("{}", e);
                    self.state = ControllerState::Failed;
                    break StreamOutcome::Failed(e.to_string());
                }
            }
        };

        self.batch.abort().await;
        self.source.close().await;
        info!("Stream {} {}", self.stream, self.state);
        outcome
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn connect(&mut self) -> Result<ControllerState, ControllerError> {
        if self.shutdown_requested() {
            return Ok(ControllerState::Stopped);
        }

        self.checkpoint = self.store.load_checkpoint(&self.stream).await?;
        let resume_from = if self.checkpoint.is_empty() {
            None
        } else {
            Some(self.checkpoint.to_triplet())
        };

        info!(
            "Connecting {} to {} at {}",
            self.stream,
            self.source.name(),
            resume_from.as_deref().unwrap_or("the beginning")
        );
        self.source
            .connect(&self.stream, resume_from)
            .await
            .map_err(ControllerError::Connect)?;

        if self.checkpoint.is_empty() {
            Ok(ControllerState::Streaming)
        } else {
            info!("Continuing from GTID: {}", self.checkpoint);
            Ok(ControllerState::Resuming)
        }
    }

    async fn stream_rows(&mut self) -> Result<ControllerState, ControllerError> {
        let mut resume = if self.state == ControllerState::Resuming {
            Resume::Seeking(self.checkpoint)
        } else {
            Resume::Done
        };

        loop {
            if self.shutdown_requested() {
                return Ok(ControllerState::Stopped);
            }

            match self.source.read(self.settings.idle_flush).await {
                ReadOutcome::Row(row) => {
                    let Some(row) = self.resume_filter(&mut resume, row) else {
                        continue;
                    };
                    self.state = ControllerState::Streaming;
                    if let Some(next) = self.handle_row(row).await? {
                        return Ok(next);
                    }
                }
                ReadOutcome::Timeout => self.idle().await?,
                ReadOutcome::Error(SourceError::Closed) if self.shutdown_requested() => {
                    return Ok(ControllerState::Stopped);
                }
                ReadOutcome::Error(e) => return Err(ControllerError::Read(e)),
            }
        }
    }

    /// Returns the row to apply, or `None` when it was consumed by resuming.
    ///
    /// With event granularity the row at the checkpoint was already committed
    /// and is dropped. With transaction granularity the checkpointed
    /// transaction is replayed in full.
    fn resume_filter(&self, resume: &mut Resume, row: Row) -> Option<Row> {
        let granularity = self.settings.granularity;
        match *resume {
            Resume::Seeking(checkpoint) => match granularity.compare(&row.gtid, &checkpoint) {
                Ordering::Greater => {
                    warn!(
                        "Couldn't finish previous transaction {} before reading a newer one {}. Continuing processing.",
                        checkpoint, row.gtid
                    );
                    *resume = Resume::Done;
                    Some(row)
                }
                _ if row.kind == RowKind::UpdateBefore
                    && granularity == ResumeGranularity::Event =>
                {
                    info!(
                        "Skipping update_before at {} and awaiting its update_after",
                        row.gtid
                    );
                    *resume = Resume::SkippingAfterImage(checkpoint);
                    None
                }
                Ordering::Less => {
                    debug!("Skipping already applied row at {}", row.gtid);
                    None
                }
                Ordering::Equal if granularity == ResumeGranularity::Event => {
                    debug!("Skipping last applied row at {}", row.gtid);
                    *resume = Resume::Done;
                    None
                }
                Ordering::Equal => {
                    *resume = Resume::Done;
                    Some(row)
                }
            },
            Resume::SkippingAfterImage(checkpoint) => {
                if row.kind == RowKind::UpdateAfter {
                    debug!("Skipping update_after at {}", row.gtid);
                    *resume = match granularity.compare(&row.gtid, &checkpoint) {
                        Ordering::Less => Resume::Seeking(checkpoint),
                        _ => Resume::Done,
                    };
                    return None;
                }
                *resume = Resume::Seeking(checkpoint);
                self.resume_filter(resume, row)
            }
            Resume::Done => Some(row),
        }
    }

    /// Applies one row, flushing when a threshold is reached.
    ///
    /// Returns the next state when the row cannot be applied because the table is missing.
    async fn handle_row(&mut self, row: Row) -> Result<Option<ControllerState>, ControllerError> {
        match self.apply(row).await {
            Ok(()) => {}
            Err(e) if e.is_table_not_found() => {
                warn!("{}", e);
                self.batch.abort().await;
                return Ok(Some(ControllerState::Recovering));
            }
            Err(e) => return Err(e.into()),
        }

        if self.batch.should_flush() {
            self.batch.flush(self.sink.as_mut(), true).await?;
            self.table_created = false;
        }
        Ok(None)
    }

    async fn apply(&mut self, row: Row) -> Result<(), BatchError> {
        if !self.batch.is_open() {
            let schema = self
                .resolver
                .resolve(self.sink.as_mut(), &self.stream.database, &self.stream.table)
                .await?;
            self.batch.open(self.sink.as_mut(), schema).await?;
        }
        self.batch.apply_row(row)
    }

    async fn idle(&mut self) -> Result<(), ControllerError> {
        if self.batch.rows() > 0 {
            debug!("Idle with {} pending rows, flushing", self.batch.rows());
            self.batch.flush(self.sink.as_mut(), false).await?;
            self.table_created = false;
        } else if self.batch.is_open() && !self.batch.has_pending_update() {
            self.batch.close_empty().await;
        }
        Ok(())
    }

    async fn recover(&mut self) -> Result<ControllerState, ControllerError> {
        let fields = self.source.fields();
        let statement = ddl::create_table_statement(
            self.sink.as_ref(),
            &self.stream,
            &fields,
            self.settings.include_metadata,
        )
        .map_err(|source| ControllerError::NoCreateStatement {
            stream: self.stream.clone(),
            source,
        })?;

        let missing = |reason: &str| ControllerError::TableMissing {
            stream: self.stream.clone(),
            reason: reason.to_string(),
            statement: statement.clone(),
        };

        if !self.settings.auto_create {
            return Err(missing("auto-create is disabled"));
        }
        if self.table_created {
            return Err(missing("table is still missing after it was created"));
        }

        info!("Creating table {}: {}", self.stream, statement);
        if let Err(e) = self.sink.execute_ddl(&statement).await {
            return Err(missing(&format!("CREATE TABLE failed: {}", e)));
        }
        self.table_created = true;

        self.resolver.invalidate();
        self.source.close().await;
        Ok(ControllerState::Connecting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{insert, orders_schema, row, MemorySink, ScriptedSource};
    use tempfile::TempDir;

    fn settings(max_rows: usize) -> StreamSettings {
        StreamSettings {
            limits: BatchLimits {
                max_rows,
                max_age: Duration::from_secs(3600),
            },
            idle_flush: Duration::from_millis(20),
            include_metadata: false,
            auto_create: false,
            transform: false,
            granularity: ResumeGranularity::Event,
        }
    }

    fn stream() -> StreamId {
        StreamId::new("shop", "orders")
    }

    fn controller(
        dir: &TempDir,
        settings: StreamSettings,
        source: ScriptedSource,
        sink: &MemorySink,
    ) -> (StreamController, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let controller = StreamController::new(
            stream(),
            settings,
            Box::new(source),
            Box::new(sink.clone()),
            StateStore::new(dir.path()),
            rx,
        );
        (controller, tx)
    }

    fn closed() -> ReadOutcome {
        ReadOutcome::Error(SourceError::read("connection reset"))
    }

    fn checkpoint(dir: &TempDir) -> Option<String> {
        std::fs::read_to_string(dir.path().join("shop.orders")).ok()
    }

    #[tokio::test]
    async fn test_streams_and_checkpoints() {
        let dir = TempDir::new().unwrap();
        let sink = MemorySink::new();
        sink.add_table(orders_schema());
        let source = ScriptedSource::new().session(vec![
            ReadOutcome::Row(insert(100, 1, "1")),
            ReadOutcome::Row(insert(100, 2, "2")),
            ReadOutcome::Row(insert(101, 1, "3")),
            closed(),
        ]);

        let (controller, _tx) = controller(&dir, settings(3), source, &sink);
        let outcome = controller.run().await;

        assert!(outcome.is_failed());
        assert_eq!(sink.state().commits, 1);
        assert_eq!(checkpoint(&dir).as_deref(), Some("0-1-101:1\n"));
    }

    #[tokio::test]
    async fn test_read_error_rolls_back_pending_rows() {
        let dir = TempDir::new().unwrap();
        let sink = MemorySink::new();
        sink.add_table(orders_schema());
        let source = ScriptedSource::new().session(vec![
            ReadOutcome::Row(insert(1, 1, "1")),
            closed(),
        ]);

        let (controller, _tx) = controller(&dir, settings(10), source, &sink);
        let outcome = controller.run().await;

        match outcome {
            StreamOutcome::Failed(reason) => assert!(reason.contains("Failed to read row")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(sink.state().commits, 0);
        assert_eq!(sink.state().rollbacks, 1);
        assert_eq!(checkpoint(&dir), None);
    }

    #[tokio::test]
    async fn test_idle_timeout_flushes_pending_rows() {
        let dir = TempDir::new().unwrap();
        let sink = MemorySink::new();
        sink.add_table(orders_schema());
        let source = ScriptedSource::new().session(vec![
            ReadOutcome::Row(insert(1, 1, "1")),
            ReadOutcome::Row(insert(2, 1, "2")),
            ReadOutcome::Timeout,
            ReadOutcome::Timeout,
            closed(),
        ]);

        let (controller, _tx) = controller(&dir, settings(10), source, &sink);
        controller.run().await;

        let state = sink.state();
        assert_eq!(state.commits, 1);
        assert_eq!(state.rows.len(), 2);
        // the second timeout finds no open transaction to release
        assert_eq!(state.opened, 1);
        assert_eq!(state.rollbacks, 0);
        drop(state);
        assert_eq!(checkpoint(&dir).as_deref(), Some("0-1-2:1\n"));
    }

    #[tokio::test]
    async fn test_connect_failure_fails_stream() {
        let dir = TempDir::new().unwrap();
        let sink = MemorySink::new();
        let (controller, _tx) =
            controller(&dir, settings(1), ScriptedSource::new().refuse_connect(), &sink);

        match controller.run().await {
            StreamOutcome::Failed(reason) => assert!(reason.contains("Failed to connect")),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resume_discards_rows_before_checkpoint() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("shop.orders"), "0-1-100:2\n").unwrap();
        let sink = MemorySink::new();
        sink.add_table(orders_schema());
        let source = ScriptedSource::new().session(vec![
            ReadOutcome::Row(insert(100, 1, "1")),
            ReadOutcome::Row(insert(100, 2, "2")),
            ReadOutcome::Row(insert(100, 3, "3")),
            closed(),
        ]);
        let log = source.log();

        let (controller, _tx) = controller(&dir, settings(1), source, &sink);
        controller.run().await;

        assert_eq!(log.lock().connects, vec![Some("0-1-100".to_string())]);
        assert_eq!(sink.column(1), vec![Some("3".to_string())]);
        assert_eq!(checkpoint(&dir).as_deref(), Some("0-1-100:3\n"));
    }

    #[tokio::test]
    async fn test_resume_applies_newer_row_first_seen() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("shop.orders"), "0-1-100:2\n").unwrap();
        let sink = MemorySink::new();
        sink.add_table(orders_schema());
        let source = ScriptedSource::new().session(vec![
            ReadOutcome::Row(insert(100, 1, "1")),
            ReadOutcome::Row(insert(101, 1, "9")),
            closed(),
        ]);

        let (controller, _tx) = controller(&dir, settings(1), source, &sink);
        controller.run().await;

        assert_eq!(sink.column(1), vec![Some("9".to_string())]);
    }

    #[tokio::test]
    async fn test_resume_skips_update_before_at_checkpoint() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("shop.orders"), "0-1-100:1\n").unwrap();
        let sink = MemorySink::new();
        sink.add_table(orders_schema());
        let source = ScriptedSource::new().session(vec![
            ReadOutcome::Row(row(RowKind::UpdateBefore, 100, 1, &[("id", Some("1"))])),
            closed(),
        ]);

        let (controller, _tx) = controller(&dir, settings(1), source, &sink);
        controller.run().await;

        assert_eq!(sink.state().commits, 0);
        assert_eq!(sink.state().schema_lookups, 0);
        assert_eq!(checkpoint(&dir).as_deref(), Some("0-1-100:1\n"));
    }

    #[tokio::test]
    async fn test_resume_by_transaction_replays_whole_transaction() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("shop.orders"), "0-1-100:2\n").unwrap();
        let sink = MemorySink::new();
        sink.add_table(orders_schema());
        let source = ScriptedSource::new().session(vec![
            ReadOutcome::Row(insert(99, 1, "0")),
            ReadOutcome::Row(insert(100, 1, "1")),
            ReadOutcome::Row(insert(100, 2, "2")),
            closed(),
        ]);

        let mut settings = settings(1);
        settings.granularity = ResumeGranularity::Transaction;
        let (controller, _tx) = controller(&dir, settings, source, &sink);
        controller.run().await;

        assert_eq!(
            sink.column(1),
            vec![Some("1".to_string()), Some("2".to_string())]
        );
    }

    #[tokio::test]
    async fn test_restart_applies_each_row_once() {
        let dir = TempDir::new().unwrap();
        let sink = MemorySink::new();
        sink.add_table(orders_schema());

        let first = ScriptedSource::new().session(vec![
            ReadOutcome::Row(insert(100, 1, "1")),
            ReadOutcome::Row(insert(100, 2, "2")),
            closed(),
        ]);
        let (first_run, _first_tx) = controller(&dir, settings(2), first, &sink);
        first_run.run().await;
        assert_eq!(checkpoint(&dir).as_deref(), Some("0-1-100:2\n"));

        // the source restarts at the checkpointed transaction
        let second = ScriptedSource::new().session(vec![
            ReadOutcome::Row(insert(100, 1, "1")),
            ReadOutcome::Row(insert(100, 2, "2")),
            ReadOutcome::Row(insert(101, 1, "3")),
            closed(),
        ]);
        let (second_run, _second_tx) = controller(&dir, settings(1), second, &sink);
        second_run.run().await;

        assert_eq!(
            sink.column(1),
            vec![
                Some("1".to_string()),
                Some("2".to_string()),
                Some("3".to_string())
            ]
        );
        assert_eq!(checkpoint(&dir).as_deref(), Some("0-1-101:1\n"));
    }

    #[tokio::test]
    async fn test_resume_skips_rows_before_skipped_update_pair() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("shop.orders"), "0-1-100:4\n").unwrap();
        let sink = MemorySink::new();
        sink.add_table(orders_schema());
        let source = ScriptedSource::new().session(vec![
            ReadOutcome::Row(row(RowKind::UpdateBefore, 100, 1, &[("id", Some("1"))])),
            ReadOutcome::Row(row(RowKind::UpdateAfter, 100, 2, &[("id", Some("1"))])),
            ReadOutcome::Row(insert(100, 3, "2")),
            ReadOutcome::Row(insert(100, 4, "3")),
            ReadOutcome::Row(insert(100, 5, "4")),
            closed(),
        ]);

        let (controller, _tx) = controller(&dir, settings(1), source, &sink);
        controller.run().await;

        assert_eq!(sink.column(1), vec![Some("4".to_string())]);
    }

    #[tokio::test]
    async fn test_resume_applies_update_pair_after_checkpoint() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("shop.orders"), "0-1-100:1\n").unwrap();
        let sink = MemorySink::new();
        sink.add_table(orders_schema());
        let source = ScriptedSource::new().session(vec![
            ReadOutcome::Row(row(RowKind::UpdateBefore, 101, 1, &[("id", Some("1")), ("name", Some("a"))])),
            ReadOutcome::Row(row(RowKind::UpdateAfter, 101, 2, &[("id", Some("1")), ("name", Some("b"))])),
            closed(),
        ]);

        let mut settings = settings(1);
        settings.transform = true;
        let (controller, _tx) = controller(&dir, settings, source, &sink);
        controller.run().await;

        assert_eq!(
            sink.state().transactions,
            vec![vec![
                "UPDATE `shop`.`orders` SET `id` = '1', `name` = 'b' WHERE `id` = '1' AND `name` = 'a'"
                    .to_string()
            ]]
        );
        assert_eq!(checkpoint(&dir).as_deref(), Some("0-1-101:2\n"));
    }

    #[tokio::test]
    async fn test_resume_at_update_after_applies_nothing() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("shop.orders"), "0-1-100:2\n").unwrap();
        let sink = MemorySink::new();
        sink.add_table(orders_schema());
        let source = ScriptedSource::new().session(vec![
            ReadOutcome::Row(row(RowKind::UpdateBefore, 100, 1, &[("id", Some("1")), ("name", Some("a"))])),
            ReadOutcome::Row(row(RowKind::UpdateAfter, 100, 2, &[("id", Some("1")), ("name", Some("b"))])),
            closed(),
        ]);

        let mut settings = settings(1);
        settings.transform = true;
        let (controller, _tx) = controller(&dir, settings, source, &sink);
        controller.run().await;

        assert!(sink.state().transactions.iter().all(|t| t.is_empty()));
        assert_eq!(checkpoint(&dir).as_deref(), Some("0-1-100:2\n"));
    }

    #[tokio::test]
    async fn test_resume_by_transaction_replays_update_pair() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("shop.orders"), "0-1-100:2\n").unwrap();
        let sink = MemorySink::new();
        sink.add_table(orders_schema());
        let source = ScriptedSource::new().session(vec![
            ReadOutcome::Row(row(RowKind::UpdateBefore, 100, 1, &[("id", Some("1")), ("name", Some("a"))])),
            ReadOutcome::Row(row(RowKind::UpdateAfter, 100, 2, &[("id", Some("1")), ("name", Some("b"))])),
            closed(),
        ]);

        let mut settings = settings(1);
        settings.granularity = ResumeGranularity::Transaction;
        let (controller, _tx) = controller(&dir, settings, source, &sink);
        controller.run().await;

        assert_eq!(
            sink.column(2),
            vec![Some("a".to_string()), Some("b".to_string())]
        );
    }

    #[tokio::test]
    async fn test_missing_table_without_auto_create_fails_with_statement() {
        let dir = TempDir::new().unwrap();
        let sink = MemorySink::new();
        let source = ScriptedSource::new().rows(vec![insert(1, 1, "1")]);

        let (controller, _tx) = controller(&dir, settings(1), source, &sink);
        match controller.run().await {
            StreamOutcome::Failed(reason) => {
                assert!(reason.contains("auto-create is disabled"));
                assert!(reason.contains("CREATE TABLE `shop`.`orders` (`id` int, `name` varchar(64))"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(sink.state().ddl.is_empty());
    }

    #[tokio::test]
    async fn test_missing_table_is_created_and_stream_restarts() {
        let dir = TempDir::new().unwrap();
        let sink = MemorySink::new();
        sink.create_on_ddl(orders_schema());
        let source = ScriptedSource::new()
            .rows(vec![insert(1, 1, "1")])
            .session(vec![ReadOutcome::Row(insert(1, 1, "1")), closed()]);
        let log = source.log();

        let mut settings = settings(1);
        settings.auto_create = true;
        let (controller, _tx) = controller(&dir, settings, source, &sink);
        controller.run().await;

        assert_eq!(sink.state().ddl.len(), 1);
        assert_eq!(log.lock().connects, vec![None, None]);
        assert_eq!(sink.column(1), vec![Some("1".to_string())]);
        assert_eq!(checkpoint(&dir).as_deref(), Some("0-1-1:1\n"));
    }

    #[tokio::test]
    async fn test_failed_create_fails_stream() {
        let dir = TempDir::new().unwrap();
        let sink = MemorySink::new().failing_ddl();
        let source = ScriptedSource::new().rows(vec![insert(1, 1, "1")]);

        let mut settings = settings(1);
        settings.auto_create = true;
        let (controller, _tx) = controller(&dir, settings, source, &sink);

        match controller.run().await {
            StreamOutcome::Failed(reason) => assert!(reason.contains("CREATE TABLE failed")),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_table_still_missing_after_create_fails() {
        let dir = TempDir::new().unwrap();
        // DDL succeeds but never creates the table
        let sink = MemorySink::new();
        let source = ScriptedSource::new()
            .rows(vec![insert(1, 1, "1")])
            .rows(vec![insert(1, 1, "1")]);

        let mut settings = settings(1);
        settings.auto_create = true;
        let (controller, _tx) = controller(&dir, settings, source, &sink);

        assert!(controller.run().await.is_failed());
        assert_eq!(sink.state().ddl.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_and_rolls_back() {
        let dir = TempDir::new().unwrap();
        let sink = MemorySink::new();
        sink.add_table(orders_schema());
        let source = ScriptedSource::new().rows(vec![insert(1, 1, "1")]);
        let signal = source.close_signal();

        let mut settings = settings(10);
        settings.idle_flush = Duration::from_secs(3600);
        let (controller, tx) = controller(&dir, settings, source, &sink);
        let handle = tokio::spawn(controller.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send_replace(true);
        signal.close();

        let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("controller should stop")
            .unwrap();
        assert_eq!(outcome, StreamOutcome::Stopped);
        assert_eq!(sink.state().commits, 0);
        assert_eq!(sink.state().rollbacks, 1);
    }

    #[tokio::test]
    async fn test_shutdown_before_connect() {
        let dir = TempDir::new().unwrap();
        let sink = MemorySink::new();
        let source = ScriptedSource::new().rows(vec![insert(1, 1, "1")]);
        let log = source.log();

        let (controller, tx) = controller(&dir, settings(1), source, &sink);
        tx.send_replace(true);

        assert_eq!(controller.run().await, StreamOutcome::Stopped);
        assert!(log.lock().connects.is_empty());
    }
}
