// Copyright 2025
// Licensed under the Elastic License v2.0

//! CDC source reading newline-delimited JSON over TCP.
//!
//! After `REQUEST-DATA db.table[ gtid]` the service answers with one JSON
//! object per line. The first object carrying a `fields` array describes the
//! table; every other object is a row whose metadata fields (`domain`,
//! `server_id`, `sequence`, `event_number`, `event_type`, `timestamp`) locate
//! it in the change history. A line starting with `ERR` rejects the request.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::SourceConfig;
use crate::core::{CdcSource, CloseSignal, Field, ReadOutcome, Row, SourceError, SourceField, StreamId};

pub struct LineSource {
    config: SourceConfig,
    reader: Option<BufReader<TcpStream>>,
    /// Bytes of the line being read. Kept across reads so a timed out read
    /// resumes where it stopped.
    buf: Vec<u8>,
    fields: Vec<SourceField>,
    signal: CloseSignal,
}

impl LineSource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            reader: None,
            buf: Vec::new(),
            fields: Vec::new(),
            signal: CloseSignal::new(),
        }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    /// Handles one complete line. `None` means the line carried no row.
    fn handle_line(&mut self, line: &[u8]) -> Option<ReadOutcome> {
        let text = String::from_utf8_lossy(line);
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if text.starts_with("ERR") {
            return Some(ReadOutcome::Error(SourceError::read(text.to_string())));
        }

        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                return Some(ReadOutcome::Error(SourceError::malformed_row(format!(
                    "invalid JSON: {}",
                    e
                ))))
            }
        };
        let Value::Object(object) = value else {
            return Some(ReadOutcome::Error(SourceError::malformed_row(
                "expected a JSON object",
            )));
        };

        if let Some(Value::Array(fields)) = object.get("fields") {
            self.fields = fields.iter().filter_map(parse_schema_field).collect();
            debug!("Received {} fields from {}", self.fields.len(), self.address());
            return None;
        }

        // Known fields keep the schema order, anything else follows.
        let mut row_fields = Vec::with_capacity(object.len());
        for field in &self.fields {
            if let Some(value) = object.get(&field.name) {
                row_fields.push(Field::new(field.name.clone(), json_to_text(value)));
            }
        }
        for (name, value) in &object {
            if !self.fields.iter().any(|f| &f.name == name) {
                row_fields.push(Field::new(name.clone(), json_to_text(value)));
            }
        }

        Some(match Row::from_fields(row_fields) {
            Ok(row) => ReadOutcome::Row(row),
            Err(e) => ReadOutcome::Error(e),
        })
    }
}

#[async_trait]
impl CdcSource for LineSource {
    fn name(&self) -> &'static str {
        "line"
    }

    async fn connect(
        &mut self,
        stream: &StreamId,
        resume_from: Option<String>,
    ) -> Result<(), SourceError> {
        let address = self.address();
        let socket = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| SourceError::connect(format!("timed out connecting to {}", address)))?
            .map_err(|e| SourceError::connect(format!("{}: {}", address, e)))?;

        let mut request = format!("REQUEST-DATA {}", stream);
        if let Some(gtid) = &resume_from {
            request.push(' ');
            request.push_str(gtid);
        }
        request.push('\n');

        let mut reader = BufReader::new(socket);
        reader
            .get_mut()
            .write_all(request.as_bytes())
            .await
            .map_err(|e| SourceError::connect(format!("failed to send request: {}", e)))?;

        info!(
            "Requested {} from {}{}",
            stream,
            address,
            resume_from.map(|g| format!(" at {}", g)).unwrap_or_default()
        );
        self.buf.clear();
        self.fields.clear();
        self.reader = Some(reader);
        Ok(())
    }

    async fn read(&mut self, timeout: Duration) -> ReadOutcome {
        let deadline = Instant::now() + timeout;

        loop {
            if self.signal.is_closed() {
                return ReadOutcome::Error(SourceError::Closed);
            }
            let Some(reader) = self.reader.as_mut() else {
                return ReadOutcome::Error(SourceError::read("not connected"));
            };

            let result = tokio::select! {
                _ = self.signal.closed() => return ReadOutcome::Error(SourceError::Closed),
                result = tokio::time::timeout_at(deadline, reader.read_until(b'\n', &mut self.buf)) => result,
            };

            match result {
                Err(_) => return ReadOutcome::Timeout,
                Ok(Err(e)) => return ReadOutcome::Error(SourceError::read(e.to_string())),
                Ok(Ok(0)) => {
                    return ReadOutcome::Error(SourceError::read("connection closed by CDC service"))
                }
                Ok(Ok(_)) => {
                    let line = std::mem::take(&mut self.buf);
                    if let Some(outcome) = self.handle_line(&line) {
                        return outcome;
                    }
                }
            }
        }
    }

    fn fields(&self) -> Vec<SourceField> {
        self.fields.clone()
    }

    fn close_signal(&self) -> CloseSignal {
        self.signal.clone()
    }

    async fn close(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            let _ = reader.get_mut().shutdown().await;
        }
        self.buf.clear();
    }
}

/// Reads `{"name": .., "type": .., "real_type": .., "length": ..}` entries.
fn parse_schema_field(value: &Value) -> Option<SourceField> {
    let name = value.get("name")?.as_str()?;

    let type_name = match value.get("real_type").and_then(Value::as_str) {
        Some(real_type) => match value.get("length").and_then(Value::as_i64) {
            Some(length) if length > 0 => format!("{}({})", real_type, length),
            _ => real_type.to_string(),
        },
        None => avro_type(value.get("type")?)?,
    };
    Some(SourceField::new(name, type_name))
}

fn avro_type(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        // nullable unions such as ["null", "string"]
        Value::Array(types) => types.iter().filter(|t| t.as_str() != Some("null")).find_map(avro_type),
        Value::Object(object) => object.get("type").and_then(avro_type),
        _ => None,
    }
}

fn json_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        other => Some(other.to_string()),
    }
}
