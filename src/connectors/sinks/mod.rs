// Copyright 2025
// Licensed under the Elastic License v2.0

//! # Sink Connectors
//!
//! Bulk sinks receiving batched rows. Each sink implements the `BulkSink`
//! trait from `crate::core::traits`.
//!
//! ## Available Sinks
//!
//! - **StarRocks**: OLAP database loaded through the Stream Load API

pub mod starrocks;

pub use self::starrocks::StarRocksSink;
