// Copyright 2025
// Licensed under the Elastic License v2.0

//! In-memory source and sink used by the unit tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hashbrown::HashMap;
use parking_lot::{Mutex, MutexGuard};

use crate::core::{
    BulkSink, BulkWriter, CdcSource, CloseSignal, CommitSummary, Connectors, Field, Gtid,
    ReadOutcome, Row, RowKind, SinkError, SourceError, SourceField, StreamId,
};
use crate::schema::{SinkColumn, TableSchema};

/// Builds a change row carrying full metadata for `domain 0, server 1`.
pub fn row(kind: RowKind, sequence: u64, event_number: u64, data: &[(&str, Option<&str>)]) -> Row {
    let mut fields = vec![
        Field::new("domain", Some("0".to_string())),
        Field::new("server_id", Some("1".to_string())),
        Field::new("sequence", Some(sequence.to_string())),
        Field::new("event_number", Some(event_number.to_string())),
        Field::new("event_type", Some(kind.as_str().to_string())),
        Field::new("timestamp", Some("1700000000".to_string())),
    ];
    fields.extend(
        data.iter()
            .map(|(name, value)| Field::new(*name, value.map(str::to_string))),
    );
    Row {
        kind,
        gtid: Gtid::new(0, 1, sequence, event_number),
        fields,
    }
}

pub fn insert(sequence: u64, event_number: u64, id: &str) -> Row {
    row(RowKind::Insert, sequence, event_number, &[("id", Some(id))])
}

/// `shop.orders (id, name)` without metadata columns.
pub fn orders_schema() -> TableSchema {
    TableSchema::new(
        "shop",
        "orders",
        vec![
            SinkColumn::new("id", 1, "int"),
            SinkColumn::new("name", 2, "varchar(64)"),
        ],
    )
}

pub fn orders_fields() -> Vec<SourceField> {
    vec![
        SourceField::new("domain", "int"),
        SourceField::new("server_id", "int"),
        SourceField::new("sequence", "int"),
        SourceField::new("event_number", "int"),
        SourceField::new("event_type", "varchar(50)"),
        SourceField::new("timestamp", "int"),
        SourceField::new("id", "int"),
        SourceField::new("name", "varchar(64)"),
    ]
}

/// Everything the memory sink has been asked to do.
#[derive(Debug, Default)]
pub struct SinkState {
    pub schema_lookups: usize,
    pub opened: usize,
    pub commits: usize,
    pub rollbacks: usize,
    /// Committed rows, as `position -> value` maps.
    pub rows: Vec<BTreeMap<u32, Option<String>>>,
    pub ddl: Vec<String>,
    /// Statement lists committed through `execute_transaction`.
    pub transactions: Vec<Vec<String>>,
    pub fail_commit: bool,
}

/// Sink keeping tables and committed data in memory. Clones share state.
#[derive(Clone, Default)]
pub struct MemorySink {
    tables: Arc<Mutex<HashMap<(String, String), TableSchema>>>,
    created_by_ddl: Arc<Mutex<Option<TableSchema>>>,
    fail_ddl: bool,
    state: Arc<Mutex<SinkState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&self, schema: TableSchema) {
        self.tables
            .lock()
            .insert((schema.database.clone(), schema.table.clone()), schema);
    }

    /// Makes the next `execute_ddl` create `schema`.
    pub fn create_on_ddl(&self, schema: TableSchema) {
        *self.created_by_ddl.lock() = Some(schema);
    }

    pub fn failing_ddl(mut self) -> Self {
        self.fail_ddl = true;
        self
    }

    pub fn state(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock()
    }

    /// Committed values of column `position` in commit order.
    pub fn column(&self, position: u32) -> Vec<Option<String>> {
        self.state
            .lock()
            .rows
            .iter()
            .map(|r| r.get(&position).cloned().flatten())
            .collect()
    }
}

#[async_trait]
impl BulkSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn table_schema(&mut self, database: &str, table: &str) -> Result<TableSchema, SinkError> {
        self.state.lock().schema_lookups += 1;
        self.tables
            .lock()
            .get(&(database.to_string(), table.to_string()))
            .cloned()
            .ok_or_else(|| SinkError::TableNotFound {
                database: database.to_string(),
                table: table.to_string(),
            })
    }

    async fn open_bulk(&mut self, schema: &TableSchema) -> Result<Box<dyn BulkWriter>, SinkError> {
        self.state.lock().opened += 1;
        Ok(Box::new(MemoryWriter {
            columns: schema.len() as u32,
            current: BTreeMap::new(),
            buffered: Vec::new(),
            state: self.state.clone(),
        }))
    }

    async fn execute_ddl(&mut self, statement: &str) -> Result<(), SinkError> {
        self.state.lock().ddl.push(statement.to_string());
        if self.fail_ddl {
            return Err(SinkError::statement("access denied"));
        }
        if let Some(schema) = self.created_by_ddl.lock().take() {
            self.add_table(schema);
        }
        Ok(())
    }

    async fn execute_transaction(&mut self, statements: &[String]) -> Result<CommitSummary, SinkError> {
        let mut state = self.state.lock();
        if state.fail_commit {
            return Err(SinkError::statement("transaction rejected"));
        }
        state.commits += 1;
        state.transactions.push(statements.to_vec());
        Ok(CommitSummary {
            rows_inserted: statements.len() as u64,
            ..Default::default()
        })
    }
}

struct MemoryWriter {
    columns: u32,
    current: BTreeMap<u32, Option<String>>,
    buffered: Vec<BTreeMap<u32, Option<String>>>,
    state: Arc<Mutex<SinkState>>,
}

impl MemoryWriter {
    fn check(&self, position: u32) -> Result<(), SinkError> {
        if position == 0 || position > self.columns {
            return Err(SinkError::load(format!("column {} out of range", position)));
        }
        Ok(())
    }
}

#[async_trait]
impl BulkWriter for MemoryWriter {
    fn set_column(&mut self, position: u32, value: &str) -> Result<(), SinkError> {
        self.check(position)?;
        self.current.insert(position, Some(value.to_string()));
        Ok(())
    }

    fn set_null(&mut self, position: u32) -> Result<(), SinkError> {
        self.check(position)?;
        self.current.insert(position, None);
        Ok(())
    }

    fn write_row(&mut self) -> Result<(), SinkError> {
        self.buffered.push(std::mem::take(&mut self.current));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<CommitSummary, SinkError> {
        let mut state = self.state.lock();
        if state.fail_commit {
            return Err(SinkError::load("commit rejected"));
        }
        state.commits += 1;
        let rows_inserted = self.buffered.len() as u64;
        state.rows.extend(self.buffered);
        Ok(CommitSummary {
            rows_inserted,
            execution_time: Duration::from_millis(1),
            ..Default::default()
        })
    }

    async fn rollback(self: Box<Self>) -> Result<(), SinkError> {
        self.state.lock().rollbacks += 1;
        Ok(())
    }
}

/// What a scripted source was asked to do.
#[derive(Debug, Default)]
pub struct SourceLog {
    /// Resume positions of every connect call.
    pub connects: Vec<Option<String>>,
    pub closes: usize,
}

/// Source replaying prepared sessions. Each `connect` starts the next session.
///
/// Once a session runs out of rows, reads time out until the close signal fires.
pub struct ScriptedSource {
    sessions: VecDeque<Result<Vec<ReadOutcome>, SourceError>>,
    current: VecDeque<ReadOutcome>,
    fields: Vec<SourceField>,
    signal: CloseSignal,
    log: Arc<Mutex<SourceLog>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            sessions: VecDeque::new(),
            current: VecDeque::new(),
            fields: orders_fields(),
            signal: CloseSignal::new(),
            log: Arc::new(Mutex::new(SourceLog::default())),
        }
    }

    pub fn session(mut self, outcomes: Vec<ReadOutcome>) -> Self {
        self.sessions.push_back(Ok(outcomes));
        self
    }

    pub fn rows(self, rows: Vec<Row>) -> Self {
        self.session(rows.into_iter().map(ReadOutcome::Row).collect())
    }

    pub fn refuse_connect(mut self) -> Self {
        self.sessions
            .push_back(Err(SourceError::connect("connection refused")));
        self
    }

    pub fn log(&self) -> Arc<Mutex<SourceLog>> {
        self.log.clone()
    }
}

#[async_trait]
impl CdcSource for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn connect(&mut self, _stream: &StreamId, resume_from: Option<String>) -> Result<(), SourceError> {
        self.log.lock().connects.push(resume_from);
        match self.sessions.pop_front() {
            Some(Ok(outcomes)) => {
                self.current = outcomes.into();
                Ok(())
            }
            Some(Err(e)) => Err(e),
            None => Err(SourceError::connect("no more sessions")),
        }
    }

    async fn read(&mut self, timeout: Duration) -> ReadOutcome {
        if self.signal.is_closed() {
            return ReadOutcome::Error(SourceError::Closed);
        }
        if let Some(outcome) = self.current.pop_front() {
            return outcome;
        }
        tokio::select! {
            _ = self.signal.closed() => ReadOutcome::Error(SourceError::Closed),
            _ = tokio::time::sleep(timeout) => ReadOutcome::Timeout,
        }
    }

    fn fields(&self) -> Vec<SourceField> {
        self.fields.clone()
    }

    fn close_signal(&self) -> CloseSignal {
        self.signal.clone()
    }

    async fn close(&mut self) {
        self.log.lock().closes += 1;
        self.current.clear();
    }
}

/// Hands out prepared sources by stream and clones of one memory sink.
pub struct ScriptedConnectors {
    sources: Mutex<HashMap<StreamId, ScriptedSource>>,
    pub sink: MemorySink,
}

impl ScriptedConnectors {
    pub fn new(sink: MemorySink) -> Self {
        Self {
            sources: Mutex::new(HashMap::new()),
            sink,
        }
    }

    pub fn with_source(self, stream: StreamId, source: ScriptedSource) -> Self {
        self.sources.lock().insert(stream, source);
        self
    }
}

#[async_trait]
impl Connectors for ScriptedConnectors {
    fn source(&self, stream: &StreamId) -> Box<dyn CdcSource> {
        Box::new(
            self.sources
                .lock()
                .remove(stream)
                .unwrap_or_else(ScriptedSource::new),
        )
    }

    async fn sink(&self) -> Result<Box<dyn BulkSink>, SinkError> {
        Ok(Box::new(self.sink.clone()))
    }
}
