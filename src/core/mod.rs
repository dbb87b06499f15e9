// Copyright 2025
// Licensed under the Elastic License v2.0

//! Types and traits shared by every stream controller.

pub mod error;
pub mod gtid;
pub mod record;
pub mod traits;

pub use error::{BatchError, CheckpointError, SchemaError, SinkError, SourceError};
pub use gtid::{Gtid, ResumeGranularity};
pub use record::{is_metadata_field, Field, Row, RowKind, SourceField, StreamId};
pub use traits::{
    BulkSink, BulkWriter, CdcSource, CloseSignal, CommitSummary, Connectors, ReadOutcome,
};
