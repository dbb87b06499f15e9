// Copyright 2025
// Licensed under the Elastic License v2.0

//! Source connectors for CDC data ingestion
//!
//! Each source implements the `CdcSource` trait from `crate::core::traits`.

pub mod line;

pub use line::LineSource;
