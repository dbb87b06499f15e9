// Copyright 2025
// Licensed under the Elastic License v2.0

use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::core::{ResumeGranularity, StreamId};
use crate::engine::{BatchLimits, StreamSettings};
use crate::utils::validate_sql_identifier;

// =============================================================================
// Source Configuration
// =============================================================================

/// CDC service endpoint
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
}

// =============================================================================
// Sink Configuration
// =============================================================================

/// StarRocks endpoint. The target database comes from each table entry.
#[derive(Clone)]
pub struct SinkConfig {
    pub url: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for SinkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkConfig")
            .field("url", &self.url)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Loader configuration read from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub tables: Vec<StreamId>,
    pub source: SourceConfig,
    pub sink: SinkConfig,
    pub state_dir: PathBuf,

    // Batching
    pub flush_rows: usize,
    pub flush_interval: Duration,
    pub idle_flush: Duration,

    pub include_metadata: bool,
    pub auto_create: bool,
    pub transform: bool,
    pub resume_granularity: ResumeGranularity,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn required_env(name: &str) -> Result<String> {
    env::var(name).with_context(|| format!("{} must be set", name))
}

fn optional_env(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parsed_env<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value '{}' for {}: {}", value, name, e)),
        Err(_) => Ok(default),
    }
}

fn bool_env(name: &str, default: bool) -> Result<bool> {
    match env::var(name) {
        Ok(value) => match value.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            other => bail!("Invalid value '{}' for {}: expected true or false", other, name),
        },
        Err(_) => Ok(default),
    }
}

/// Parses a comma separated list of `database.table` entries.
pub fn parse_tables(list: &str) -> Result<Vec<StreamId>> {
    let mut tables = Vec::new();
    for entry in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let stream = StreamId::parse(entry)
            .with_context(|| format!("Invalid table '{}': expected database.table", entry))?;
        validate_sql_identifier(&stream.database)?;
        validate_sql_identifier(&stream.table)?;
        if !tables.contains(&stream) {
            tables.push(stream);
        }
    }

    if tables.is_empty() {
        bail!("TABLES must name at least one database.table");
    }
    Ok(tables)
}

// =============================================================================
// Config Implementation
// =============================================================================

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let tables = parse_tables(&required_env("TABLES")?)?;

        let source = SourceConfig {
            host: optional_env("CDC_HOST", "127.0.0.1"),
            port: parsed_env("CDC_PORT", 4001)?,
            connect_timeout: Duration::from_secs(parsed_env("CDC_CONNECT_TIMEOUT_SECS", 10)?),
        };

        let sink = SinkConfig {
            url: required_env("SINK_URL")?,
            port: parsed_env("SINK_PORT", 9030)?,
            user: optional_env("SINK_USER", "root"),
            password: optional_env("SINK_PASSWORD", ""),
        };

        let flush_rows: usize = parsed_env("FLUSH_ROWS", 1)?;
        if flush_rows == 0 {
            bail!("FLUSH_ROWS must be at least 1");
        }

        let idle_flush_secs: u64 = parsed_env("IDLE_FLUSH_SECS", 5)?;
        if idle_flush_secs == 0 {
            bail!("IDLE_FLUSH_SECS must be at least 1");
        }

        let resume_granularity = optional_env("RESUME_GRANULARITY", "event")
            .parse::<ResumeGranularity>()
            .map_err(anyhow::Error::msg)?;

        Ok(Self {
            tables,
            source,
            sink,
            state_dir: PathBuf::from(optional_env("STATE_DIR", "./state")),
            flush_rows,
            flush_interval: Duration::from_secs(parsed_env("FLUSH_INTERVAL_SECS", 5)?),
            idle_flush: Duration::from_secs(idle_flush_secs),
            include_metadata: bool_env("INCLUDE_METADATA", true)?,
            auto_create: bool_env("AUTO_CREATE", false)?,
            transform: bool_env("TRANSFORM", false)?,
            resume_granularity,
        })
    }

    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            limits: BatchLimits {
                max_rows: self.flush_rows,
                max_age: self.flush_interval,
            },
            idle_flush: self.idle_flush,
            include_metadata: self.include_metadata,
            auto_create: self.auto_create,
            transform: self.transform,
            granularity: self.resume_granularity,
        }
    }

    /// Log banner with configuration
    pub fn print_banner(&self) {
        info!("Starting cdc-bulk-loader...");
        info!("Source: CDC at {}:{}", self.source.host, self.source.port);
        info!("Sink: StarRocks at {} (user: {})", self.sink.url, self.sink.user);
        info!(
            "Flush: {} rows or {}s, idle flush after {}s",
            self.flush_rows,
            self.flush_interval.as_secs(),
            self.idle_flush.as_secs()
        );
        info!(
            "Mode: {}, metadata: {}, auto-create: {}, resume by {}",
            if self.transform { "transform" } else { "bulk" },
            self.include_metadata,
            self.auto_create,
            self.resume_granularity
        );
        info!("State: {}", self.state_dir.display());
        let tables: Vec<String> = self.tables.iter().map(|t| t.to_string()).collect();
        info!("Tables: {:?}", tables);
    }
}

// =============================================================================
// Tests
// =============================================================================
