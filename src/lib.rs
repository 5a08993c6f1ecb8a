//! # tradeya-backfill
//!
//! Operator tooling for out-of-band data maintenance on the TradeYa
//! document store. Every job is an idempotent pass over one collection:
//!
//! 1. **Scan** the collection once ([`scanner`])
//! 2. **Decide** per document: skip or compute a patch ([`transform`])
//! 3. **Commit** the patch as its own write batch and tally the outcome
//!    ([`store::WriteBatch`], [`report`])
//!
//! Re-running a job is always safe: documents that already carry the target
//! field are skipped and their value is never touched.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tradeya_backfill::{builtin_jobs, BackfillRunner, RunOptions, SledStore};
//!
//! let store = SledStore::open("/var/lib/tradeya/store.sled")?;
//! let job = builtin_jobs()[0].build()?;
//! let report = BackfillRunner::new(&store, RunOptions::default()).run(&job).await?;
//! println!("{}", report); // Collection trades: updated=1, skipped=2
//! ```
//!
//! ## Module Organization
//!
//! - [`store`] - Document store trait, sled and in-memory backends
//! - [`scanner`] - Full-collection snapshots
//! - [`transform`] - Filters, presence checks and default field maps
//! - [`jobs`] - Configured and built-in backfill jobs
//! - [`runner`] - Run lifecycle, error policy, bounded concurrency
//! - [`reputation`] - Reputation recompute from the event log
//! - [`checkpoint`] - Resume cursors
//! - [`backup`] - Snapshots and rollback
//! - [`fixtures`] - JSON fixture import

pub mod backup;
pub mod checkpoint;
pub mod config;
pub mod document;
pub mod error;
pub mod fixtures;
pub mod jobs;
pub mod report;
pub mod reputation;
pub mod runner;
pub mod scanner;
pub mod store;
pub mod transform;

use tracing::info;

pub use checkpoint::{Checkpoint, CheckpointFile, Cursor};
pub use config::{Config, ErrorPolicy};
pub use document::{Document, FieldMap};
pub use error::{BackfillError, StoreError, TransformError};
pub use jobs::{builtin_jobs, BackfillJob, JobSpec};
pub use report::{CollectionReport, DocumentFailure, FailurePhase, ReputationReport, RunReport};
pub use reputation::{EventLogReputation, ReputationConfig, ReputationScore, ReputationService};
pub use runner::{BackfillRunner, RunOptions, RunState};
pub use scanner::{scan, CollectionScan};
pub use store::{DocumentStore, MemoryStore, SledStore, WriteBatch, WriteOp};
pub use transform::{Decision, DocumentFilter, FieldBackfill, FieldFilter, Transform};

/// Open the configured store. Nothing else may run until this succeeds.
pub fn initialize(config: &Config) -> Result<SledStore, BackfillError> {
    if let Some(parent) = config.store_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| BackfillError::Init(format!("{}: {}", parent.display(), e)))?;
    }
    let store = SledStore::open(&config.store_path)
        .map_err(|e| BackfillError::Init(format!("{}: {}", config.store_path.display(), e)))?;
    info!(
        path = %config.store_path.display(),
        documents = store.len(),
        "Store initialized"
    );
    Ok(store)
}
