// Copyright 2025
// Licensed under the Elastic License v2.0

//! # StarRocks Sink Connector
//!
//! Bulk sink backed by StarRocks. Table metadata, DDL and row-transform DML go
//! through the MySQL protocol (port 9030); bulk transactions are buffered in
//! memory as JSON rows and committed by a single Stream Load request.
//!
//! ## Architecture
//!
//! ```text
//! BatchTransaction ---> StarRocksWriter ---> StreamLoadClient ---> StarRocks FE
//!        |                                    (curl loader)         HTTP 8040
//!        v                                                              |
//! StarRocksSink ---> mysql_async Pool ---> StarRocks FE                v
//! (schema, DDL, DML)                       MySQL 9030              StarRocks BE
//! ```

mod config;
pub mod stream_load;
pub(crate) mod types;

use async_trait::async_trait;
use chrono::Utc;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, OptsBuilder, Pool, TxOpts};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::SinkConfig;
use crate::core::{BulkSink, BulkWriter, CommitSummary, SinkError};
use crate::schema::{SinkColumn, TableSchema};
use crate::utils::quote_identifier;

pub use self::config::StarRocksSinkConfig;
use self::stream_load::StreamLoadClient;
use self::types::TypeMapper;

/// StarRocks sink. Clones share the connection pool and the Stream Load client.
#[derive(Clone)]
pub struct StarRocksSink {
    config: Arc<StarRocksSinkConfig>,
    /// MySQL connection pool for metadata, DDL and DML
    pool: Pool,
    stream_load: Arc<StreamLoadClient>,
    type_mapper: TypeMapper,
}

impl StarRocksSink {
    pub fn new(config: &SinkConfig) -> anyhow::Result<Self> {
        let sr_config = StarRocksSinkConfig::from_sink_config(config)?;
        let stream_load = StreamLoadClient::new(
            sr_config.http_url.clone(),
            sr_config.hostname(),
            sr_config.user.clone(),
            sr_config.password.clone(),
            sr_config.load_timeout,
        );
        let pool = Self::create_pool(&sr_config);

        info!("StarRocksSink initialized:");
        info!("  HTTP URL: {}", sr_config.http_url);
        info!("  MySQL Port: {}", sr_config.mysql_port);

        Ok(Self {
            config: Arc::new(sr_config),
            pool,
            stream_load: Arc::new(stream_load),
            type_mapper: TypeMapper::new(),
        })
    }

    fn create_pool(config: &StarRocksSinkConfig) -> Pool {
        let opts = OptsBuilder::default()
            .ip_or_hostname(config.hostname())
            .tcp_port(config.mysql_port)
            .user(Some(config.user.clone()))
            .pass(Some(config.password.clone()))
            .prefer_socket(false); // Force TCP, StarRocks doesn't support Unix socket

        Pool::new(opts)
    }

    async fn conn(&self) -> Result<Conn, SinkError> {
        self.pool
            .get_conn()
            .await
            .map_err(|e| SinkError::connection(format!("StarRocks MySQL connection failed: {}", e)))
    }

    /// Verifies connectivity to StarRocks via MySQL protocol.
    pub async fn verify_connection(&self) -> Result<(), SinkError> {
        let mut conn = self.conn().await?;
        let _: Option<i32> = conn
            .query_first("SELECT 1")
            .await
            .map_err(|e| SinkError::connection(format!("Connection test failed: {}", e)))?;
        Ok(())
    }

    /// Disconnects the pool once every clone is done with it.
    pub async fn disconnect(self) {
        if let Err(e) = self.pool.disconnect().await {
            warn!("Failed to close StarRocks connections: {}", e);
        }
    }
}

#[async_trait]
impl BulkSink for StarRocksSink {
    fn name(&self) -> &'static str {
        "starrocks"
    }

    async fn table_schema(&mut self, database: &str, table: &str) -> Result<TableSchema, SinkError> {
        let mut conn = self.conn().await?;

        let rows: Vec<(String, u64, String, String, Option<String>)> = conn
            .exec(
                "SELECT COLUMN_NAME, ORDINAL_POSITION, DATA_TYPE, IS_NULLABLE, COLUMN_DEFAULT
                 FROM information_schema.columns
                 WHERE table_schema = ? AND table_name = ?
                 ORDER BY ORDINAL_POSITION",
                (database, table),
            )
            .await
            .map_err(|e| SinkError::statement(format!("Failed to read columns of {}.{}: {}", database, table, e)))?;

        if rows.is_empty() {
            return Err(SinkError::TableNotFound {
                database: database.to_string(),
                table: table.to_string(),
            });
        }

        let mut columns = Vec::with_capacity(rows.len());
        for (name, position, data_type, nullable, default_value) in rows {
            let position = u32::try_from(position)
                .map_err(|_| SinkError::statement(format!("column position {} out of range", position)))?;
            columns.push(SinkColumn {
                name,
                position,
                data_type,
                nullable: nullable.eq_ignore_ascii_case("YES"),
                default_value,
            });
        }
        debug!("Loaded {} columns of {}.{}", columns.len(), database, table);
        Ok(TableSchema::new(database, table, columns))
    }

    async fn open_bulk(&mut self, schema: &TableSchema) -> Result<Box<dyn BulkWriter>, SinkError> {
        let columns = (1..=schema.len() as u32)
            .map(|position| {
                schema
                    .column_at(position)
                    .map(|c| c.name.clone())
                    .ok_or_else(|| SinkError::load(format!("no column at position {}", position)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Box::new(StarRocksWriter {
            client: self.stream_load.clone(),
            database: schema.database.clone(),
            table: schema.table.clone(),
            columns,
            current: serde_json::Map::new(),
            body: Vec::new(),
            rows: 0,
            max_retries: self.config.max_retries,
        }))
    }

    async fn execute_ddl(&mut self, statement: &str) -> Result<(), SinkError> {
        let mut conn = self.conn().await?;
        conn.query_drop(statement)
            .await
            .map_err(|e| SinkError::statement(format!("{}: {}", statement, e)))?;
        info!("Executed: {}", statement);
        Ok(())
    }

    async fn execute_transaction(&mut self, statements: &[String]) -> Result<CommitSummary, SinkError> {
        let started = Instant::now();
        let mut conn = self.conn().await?;

        // Dropping the transaction on error rolls it back
        let mut tx = conn
            .start_transaction(TxOpts::default())
            .await
            .map_err(|e| SinkError::statement(format!("Failed to begin transaction: {}", e)))?;

        let mut affected = 0u64;
        for statement in statements {
            tx.query_drop(statement)
                .await
                .map_err(|e| SinkError::statement(format!("{}: {}", statement, e)))?;
            affected += tx.affected_rows();
        }

        tx.commit()
            .await
            .map_err(|e| SinkError::statement(format!("Failed to commit transaction: {}", e)))?;

        Ok(CommitSummary {
            rows_inserted: affected,
            execution_time: started.elapsed(),
            ..Default::default()
        })
    }

    fn map_type(&self, source_type: &str) -> String {
        self.type_mapper.to_starrocks_type(source_type)
    }

    /// Generated tables are duplicate-key tables hashed on their first column.
    fn create_table_suffix(&self, first_column: &str) -> String {
        let key = quote_identifier(first_column).unwrap_or_else(|_| format!("`{}`", first_column));
        format!("DUPLICATE KEY({}) DISTRIBUTED BY HASH({})", key, key)
    }
}

/// Bulk transaction buffered as a JSON array until commit.
struct StarRocksWriter {
    client: Arc<StreamLoadClient>,
    database: String,
    table: String,
    /// Column names by position - 1
    columns: Vec<String>,
    current: serde_json::Map<String, serde_json::Value>,
    body: Vec<u8>,
    rows: u64,
    max_retries: u32,
}

impl StarRocksWriter {
    fn column(&self, position: u32) -> Result<&str, SinkError> {
        position
            .checked_sub(1)
            .and_then(|i| self.columns.get(i as usize))
            .map(String::as_str)
            .ok_or_else(|| {
                SinkError::load(format!(
                    "column position {} out of range for {}.{}",
                    position, self.database, self.table
                ))
            })
    }

    fn label(&self) -> String {
        format!(
            "{}_{}_{}",
            self.database,
            self.table,
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        )
    }
}

#[async_trait]
impl BulkWriter for StarRocksWriter {
    fn set_column(&mut self, position: u32, value: &str) -> Result<(), SinkError> {
        let name = self.column(position)?.to_string();
        self.current.insert(name, serde_json::Value::String(value.to_string()));
        Ok(())
    }

    fn set_null(&mut self, position: u32) -> Result<(), SinkError> {
        let name = self.column(position)?.to_string();
        self.current.insert(name, serde_json::Value::Null);
        Ok(())
    }

    fn write_row(&mut self) -> Result<(), SinkError> {
        let row = std::mem::take(&mut self.current);
        self.body.push(if self.rows == 0 { b'[' } else { b',' });
        serde_json::to_writer(&mut self.body, &row)
            .map_err(|e| SinkError::load(format!("Failed to encode row: {}", e)))?;
        self.rows += 1;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<CommitSummary, SinkError> {
        if self.rows == 0 {
            return Ok(CommitSummary::default());
        }
        self.body.push(b']');

        let label = self.label();
        let body = Arc::new(std::mem::take(&mut self.body));
        let mut attempt = 0;

        // The label makes a retry of an already applied load a no-op
        let result = loop {
            match self
                .client
                .send(&self.database, &self.table, &label, body.clone())
                .await
            {
                Ok(result) => break result,
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.max_retries {
                        return Err(SinkError::load(format!(
                            "Failed after {} attempts: {}",
                            self.max_retries, e
                        )));
                    }
                    info!("Retry {}/{} for {}.{}: {}", attempt, self.max_retries, self.database, self.table, e);

                    // Exponential backoff: 200ms, 400ms, 800ms...
                    tokio::time::sleep(Duration::from_millis(100 * 2_u64.pow(attempt))).await;
                }
            }
        };
        debug!(
            "Stream Load {} for {}.{}: {} rows, {}",
            result.status, self.database, self.table, result.loaded_rows, result.message
        );

        Ok(CommitSummary {
            rows_inserted: result.loaded_rows,
            execution_time: result.load_time,
            truncation_count: 0,
            saturated_count: 0,
            invalid_count: result.filtered_rows + result.unselected_rows,
        })
    }

    async fn rollback(self: Box<Self>) -> Result<(), SinkError> {
        debug!("Discarding {} buffered rows for {}.{}", self.rows, self.database, self.table);
        Ok(())
    }
}
