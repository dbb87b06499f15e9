// Copyright 2025
// Licensed under the Elastic License v2.0

//! StarRocks Sink Configuration
//!
//! Derived from the generic `SinkConfig`. The target database is not part of
//! the sink configuration: every streamed table names its own.

use anyhow::{anyhow, Result};
use std::time::Duration;

use crate::config::SinkConfig;

/// Default HTTP port for StarRocks Stream Load API
const DEFAULT_HTTP_PORT: u16 = 8040;

/// Default MySQL protocol port for DDL operations
const DEFAULT_MYSQL_PORT: u16 = 9030;

/// Connection details for both Stream Load (HTTP) and the MySQL protocol.
#[derive(Clone)]
pub struct StarRocksSinkConfig {
    /// HTTP URL for Stream Load API (e.g., "http://starrocks:8040")
    pub http_url: String,

    /// MySQL protocol port for schema lookups, DDL and DML
    pub mysql_port: u16,

    pub user: String,
    pub password: String,

    /// Timeout of one Stream Load request
    pub load_timeout: Duration,

    /// Stream Load attempts before a commit fails
    pub max_retries: u32,
}

impl std::fmt::Debug for StarRocksSinkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StarRocksSinkConfig")
            .field("http_url", &self.http_url)
            .field("mysql_port", &self.mysql_port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("load_timeout", &self.load_timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl StarRocksSinkConfig {
    pub fn from_sink_config(config: &SinkConfig) -> Result<Self> {
        let sr_config = Self {
            http_url: Self::normalize_http_url(&config.url)?,
            mysql_port: config.port,
            user: config.user.clone(),
            password: config.password.clone(),
            ..Default::default()
        };
        sr_config.validate()?;
        Ok(sr_config)
    }

    /// Normalizes the HTTP URL for Stream Load.
    ///
    /// - Adds `http://` prefix if missing
    /// - Adds port 8040 when none is given
    fn normalize_http_url(url: &str) -> Result<String> {
        let url = url.trim().trim_end_matches('/');

        let (scheme, rest) = match url.split_once("://") {
            Some((scheme @ ("http" | "https"), rest)) => (scheme, rest),
            Some((scheme, _)) => return Err(anyhow!("Unsupported URL scheme: {}", scheme)),
            None => ("http", url),
        };

        match rest.split(':').collect::<Vec<_>>().as_slice() {
            [host] if !host.is_empty() => Ok(format!("{}://{}:{}", scheme, host, DEFAULT_HTTP_PORT)),
            [host, port] if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(format!("{}://{}:{}", scheme, host, port))
            }
            _ => Err(anyhow!("Invalid URL format: {}", url)),
        }
    }

    /// Extracts the hostname from the HTTP URL.
    pub fn hostname(&self) -> String {
        self.http_url
            .trim_start_matches("http://")
            .trim_start_matches("https://")
            .split(':')
            .next()
            .unwrap_or("localhost")
            .to_string()
    }

    pub fn validate(&self) -> Result<()> {
        if self.user.is_empty() {
            return Err(anyhow!("Username is required"));
        }

        if self.load_timeout.is_zero() {
            return Err(anyhow!("Load timeout must be greater than 0"));
        }

        if self.max_retries == 0 {
            return Err(anyhow!("At least one load attempt is required"));
        }

        Ok(())
    }
}

impl Default for StarRocksSinkConfig {
    fn default() -> Self {
        Self {
            http_url: format!("http://localhost:{}", DEFAULT_HTTP_PORT),
            mysql_port: DEFAULT_MYSQL_PORT,
            user: "root".to_string(),
            password: String::new(),
            load_timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}
