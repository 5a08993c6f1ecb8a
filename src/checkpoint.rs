//! Resume cursors
//!
//! Scans are walked in ascending id order, so "everything up to and
//! including id X is done" is a complete description of progress. The
//! checkpoint file keeps one such cursor per job name.
//!
//! ```json
//! {
//!   "cursors": {
//!     "trades-visibility": { "last_id": "t0420", "processed": 420, "updated_at": "..." }
//!   }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::BackfillError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    /// Last document id whose outcome has been recorded
    pub last_id: String,
    /// Documents processed under this cursor so far
    pub processed: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(default)]
    pub cursors: BTreeMap<String, Cursor>,
}

/// Checkpoint persisted as a JSON file
#[derive(Debug, Clone)]
pub struct CheckpointFile {
    path: PathBuf,
}

impl CheckpointFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the checkpoint; a missing file is an empty checkpoint
    pub async fn load(&self) -> Result<Checkpoint, BackfillError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                BackfillError::Checkpoint(format!("{}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Checkpoint::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn cursor(&self, job: &str) -> Result<Option<Cursor>, BackfillError> {
        Ok(self.load().await?.cursors.remove(job))
    }

    /// Record progress for `job`
    pub async fn record(&self, job: &str, last_id: &str, processed: u64) -> Result<(), BackfillError> {
        let mut checkpoint = self.load().await?;
        checkpoint.cursors.insert(
            job.to_string(),
            Cursor {
                last_id: last_id.to_string(),
                processed,
                updated_at: Utc::now(),
            },
        );
        self.save(&checkpoint).await?;
        debug!(job = %job, last_id = %last_id, processed, "Checkpoint recorded");
        Ok(())
    }

    /// Forget the cursor for `job` once it has run to completion
    pub async fn clear(&self, job: &str) -> Result<(), BackfillError> {
        let mut checkpoint = self.load().await?;
        if checkpoint.cursors.remove(job).is_some() {
            self.save(&checkpoint).await?;
            debug!(job = %job, "Checkpoint cleared");
        }
        Ok(())
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), BackfillError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(checkpoint)?;
        // Write-then-rename keeps the previous cursor intact if we die mid-write.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
