//! Run reports
//!
//! A [`CollectionReport`] is the accumulator threaded through one backfill
//! loop. Every scanned document lands in exactly one bucket, so
//! `updated + skipped + failed == processed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::BackfillError;

/// Where a per-document failure happened
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailurePhase {
    /// Deciding the new value
    Transform,
    /// Writing the batch
    Commit,
    /// Reputation recompute for one user
    Recompute,
}

impl fmt::Display for FailurePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailurePhase::Transform => "transform",
            FailurePhase::Commit => "commit",
            FailurePhase::Recompute => "recompute",
        };
        f.write_str(name)
    }
}

/// One document that could not be processed
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DocumentFailure {
    pub id: String,
    pub phase: FailurePhase,
    pub message: String,
}

/// Counts for one job over one collection
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CollectionReport {
    pub job: String,
    pub collection: String,
    /// Documents in the snapshot
    pub scanned: u64,
    /// Documents skipped because an earlier run already processed them
    pub resumed_past: u64,
    pub updated: u64,
    /// Target field already present
    pub skipped_present: u64,
    /// Outside the job's filter
    pub skipped_filtered: u64,
    pub failed: u64,
    pub failures: Vec<DocumentFailure>,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CollectionReport {
    pub fn new(job: &str, collection: &str) -> Self {
        Self {
            job: job.to_string(),
            collection: collection.to_string(),
            scanned: 0,
            resumed_past: 0,
            updated: 0,
            skipped_present: 0,
            skipped_filtered: 0,
            failed: 0,
            failures: Vec::new(),
            dry_run: false,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn record_updated(&mut self) {
        self.updated += 1;
    }

    pub fn record_present(&mut self) {
        self.skipped_present += 1;
    }

    pub fn record_filtered(&mut self) {
        self.skipped_filtered += 1;
    }

    pub fn record_failure(&mut self, id: &str, phase: FailurePhase, message: String) {
        self.failed += 1;
        self.failures.push(DocumentFailure {
            id: id.to_string(),
            phase,
            message,
        });
    }

    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    /// Skips of either kind
    pub fn skipped(&self) -> u64 {
        self.skipped_present + self.skipped_filtered
    }

    /// Documents that reached a decision or failed in this run
    pub fn processed(&self) -> u64 {
        self.updated + self.skipped() + self.failed
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.completed_at.is_some()
    }
}

impl fmt::Display for CollectionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Collection {}: updated={}, skipped={}",
            self.collection,
            self.updated,
            self.skipped()
        )?;
        if self.failed > 0 {
            write!(f, ", failed={}", self.failed)?;
        }
        if self.dry_run {
            write!(f, " (dry run)")?;
        }
        Ok(())
    }
}

/// Counts for a reputation recompute pass
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReputationReport {
    pub collection: String,
    pub scanned: u64,
    pub resumed_past: u64,
    pub recomputed: u64,
    pub failed: u64,
    pub failures: Vec<DocumentFailure>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ReputationReport {
    pub fn new(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            scanned: 0,
            resumed_past: 0,
            recomputed: 0,
            failed: 0,
            failures: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn record_failure(&mut self, id: &str, message: String) {
        self.failed += 1;
        self.failures.push(DocumentFailure {
            id: id.to_string(),
            phase: FailurePhase::Recompute,
            message,
        });
    }

    pub fn processed(&self) -> u64 {
        self.recomputed + self.failed
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.completed_at.is_some()
    }
}

impl fmt::Display for ReputationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Reputation recomputed for {} users in {}",
            self.recomputed, self.collection
        )?;
        if self.failed > 0 {
            write!(f, ", failed={}", self.failed)?;
        }
        Ok(())
    }
}

/// Everything one CLI invocation did, for `--report-json`
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub collections: Vec<CollectionReport>,
    pub reputation: Option<ReputationReport>,
    /// Fatal error that ended the run, if any
    pub error: Option<String>,
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            completed_at: None,
            collections: Vec::new(),
            reputation: None,
            error: None,
        }
    }

    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    pub fn total_failed(&self) -> u64 {
        self.collections.iter().map(|c| c.failed).sum::<u64>()
            + self.reputation.as_ref().map_or(0, |r| r.failed)
    }

    pub fn total_updated(&self) -> u64 {
        self.collections.iter().map(|c| c.updated).sum()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.total_failed() == 0
    }

    pub async fn save_json(&self, path: &Path) -> Result<(), BackfillError> {
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}
