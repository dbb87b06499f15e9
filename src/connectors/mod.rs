// Copyright 2025
// Licensed under the Elastic License v2.0

//! Connectors module
//!
//! Concrete CDC sources and bulk sinks, and the factory handing them out to
//! the stream controllers.
//!
//! # Sources
//! - `line` - newline-delimited JSON change rows over TCP
//!
//! # Sinks
//! - `starrocks` - StarRocks via Stream Load HTTP API

pub mod sinks;
pub mod sources;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{Config, SourceConfig};
use crate::core::{BulkSink, CdcSource, Connectors, SinkError, StreamId};
use self::sinks::StarRocksSink;
use self::sources::LineSource;

/// Creates one line source and one StarRocks sink handle per stream.
pub struct LoaderConnectors {
    source: SourceConfig,
    sink: StarRocksSink,
}

impl LoaderConnectors {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            source: config.source.clone(),
            sink: StarRocksSink::new(&config.sink)?,
        })
    }

    /// Closes the shared sink connections.
    pub async fn close(&self) {
        self.sink.clone().disconnect().await;
    }
}

#[async_trait]
impl Connectors for LoaderConnectors {
    fn source(&self, _stream: &StreamId) -> Box<dyn CdcSource> {
        Box::new(LineSource::new(self.source.clone()))
    }

    async fn sink(&self) -> Result<Box<dyn BulkSink>, SinkError> {
        let sink = self.sink.clone();
        sink.verify_connection().await?;
        Ok(Box::new(sink))
    }
}
