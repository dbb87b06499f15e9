// Copyright 2025
// Licensed under the Elastic License v2.0

//! File-backed checkpoint store.
//!
//! One file per stream at `{state_dir}/{database}.{table}` holding a single line
//! with the last committed GTID. Files are replaced atomically: the new content is
//! written and synced to a temporary file which is then renamed over the old one.

use std::io::ErrorKind;
use std::path::PathBuf;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::core::{CheckpointError, Gtid, StreamId};

#[derive(Debug, Clone)]
pub struct StateStore {
    state_dir: PathBuf,
}

impl StateStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn checkpoint_path(&self, stream: &StreamId) -> PathBuf {
        self.state_dir.join(format!("{}.{}", stream.database, stream.table))
    }

    /// Loads the last committed GTID, or the empty GTID when there is none yet.
    pub async fn load_checkpoint(&self, stream: &StreamId) -> Result<Gtid, CheckpointError> {
        let path = self.checkpoint_path(stream);

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No checkpoint at {}", path.display());
                return Ok(Gtid::default());
            }
            Err(e) => return Err(CheckpointError::Unavailable { path, source: e }),
        };

        let line = content.lines().next().unwrap_or("").trim();
        if line.is_empty() {
            debug!("Empty checkpoint file at {}", path.display());
            return Ok(Gtid::default());
        }

        Gtid::parse(line)
    }

    /// Persists `gtid` as the last committed position of `stream`.
    pub async fn save_checkpoint(&self, stream: &StreamId, gtid: &Gtid) -> Result<(), CheckpointError> {
        let path = self.checkpoint_path(stream);
        let unavailable = |source| CheckpointError::Unavailable {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&self.state_dir).await.map_err(unavailable)?;

        let temp_path = path.with_extension(format!(
            "{}.tmp",
            path.extension().and_then(|e| e.to_str()).unwrap_or_default()
        ));

        let mut file = fs::File::create(&temp_path).await.map_err(unavailable)?;
        file.write_all(format!("{}\n", gtid).as_bytes())
            .await
            .map_err(unavailable)?;
        file.sync_all().await.map_err(unavailable)?;
        drop(file);

        fs::rename(&temp_path, &path).await.map_err(unavailable)?;

        debug!("Checkpoint {} saved at {}", stream, gtid);
        Ok(())
    }
}
