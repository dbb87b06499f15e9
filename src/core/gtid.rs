// Copyright 2025
// Licensed under the Elastic License v2.0

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::core::error::CheckpointError;

/// Global transaction identifier of a replicated change.
///
/// Ordering and equality only look at `(sequence, event_number)`. The domain and
/// server id identify where the transaction came from and are carried along so the
/// position can be handed back to the source on reconnect.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gtid {
    pub domain: u32,
    pub server_id: u32,
    pub sequence: u64,
    pub event_number: u64,
}

impl Gtid {
    pub fn new(domain: u32, server_id: u32, sequence: u64, event_number: u64) -> Self {
        Self {
            domain,
            server_id,
            sequence,
            event_number,
        }
    }

    /// Parses `domain-server_id-sequence:event_number`.
    ///
    /// The legacy state format without `:event_number` is accepted and resolves to
    /// the first event of the transaction.
    pub fn parse(text: &str) -> Result<Self, CheckpointError> {
        let text = text.trim();
        let malformed = || CheckpointError::Malformed {
            value: text.to_string(),
        };

        let (triplet, event_number) = match text.split_once(':') {
            Some((triplet, event)) => (triplet, Some(event)),
            None => (text, None),
        };

        let mut parts = triplet.splitn(3, '-');
        let domain = parts.next().and_then(|p| p.parse().ok()).ok_or_else(malformed)?;
        let server_id = parts.next().and_then(|p| p.parse().ok()).ok_or_else(malformed)?;
        let sequence = parts.next().and_then(|p| p.parse().ok()).ok_or_else(malformed)?;

        let event_number = match event_number {
            Some(event) => event.parse().map_err(|_| malformed())?,
            None => 1,
        };

        Ok(Self::new(domain, server_id, sequence, event_number))
    }

    /// The empty GTID marks "no previous position".
    pub fn is_empty(&self) -> bool {
        self.sequence == 0
    }

    /// Transaction-level form sent to the source when resuming.
    pub fn to_triplet(&self) -> String {
        format!("{}-{}-{}", self.domain, self.server_id, self.sequence)
    }

    pub fn same_transaction(&self, other: &Gtid) -> bool {
        self.sequence == other.sequence
    }
}

impl PartialEq for Gtid {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence && self.event_number == other.event_number
    }
}

impl Eq for Gtid {}

impl PartialOrd for Gtid {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Gtid {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sequence
            .cmp(&other.sequence)
            .then(self.event_number.cmp(&other.event_number))
    }
}

impl fmt::Display for Gtid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.to_triplet(), self.event_number)
    }
}

impl FromStr for Gtid {
    type Err = CheckpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Gtid::parse(s)
    }
}

/// How far a resumed stream is compared against the stored checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeGranularity {
    /// Compare `(sequence, event_number)`: only events after the checkpoint are new.
    Event,
    /// Compare `sequence` only: the whole checkpointed transaction is replayed.
    Transaction,
}

impl ResumeGranularity {
    pub fn compare(&self, row: &Gtid, checkpoint: &Gtid) -> Ordering {
        match self {
            ResumeGranularity::Event => row.cmp(checkpoint),
            ResumeGranularity::Transaction => row.sequence.cmp(&checkpoint.sequence),
        }
    }
}

impl FromStr for ResumeGranularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "event" => Ok(ResumeGranularity::Event),
            "transaction" | "trx" => Ok(ResumeGranularity::Transaction),
            other => Err(format!(
                "Unsupported resume granularity: '{}'. Supported: event, transaction",
                other
            )),
        }
    }
}

impl fmt::Display for ResumeGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResumeGranularity::Event => write!(f, "event"),
            ResumeGranularity::Transaction => write!(f, "transaction"),
        }
    }
}
