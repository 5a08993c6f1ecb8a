//! Backfill runner
//!
//! Drives one job through the run lifecycle:
//!
//! ```text
//! NotStarted ──► Scanning ──► Processing ──► Reporting ──► Done
//!                    │             │
//!                    └─────────────┴──► Aborted
//! ```
//!
//! Documents are decided and committed inside a fixed-size window of
//! in-flight futures. The window is order-preserving, so outcomes are
//! tallied in scan order and the resume cursor always marks a contiguous
//! prefix of the collection.

use futures_util::stream::{self, StreamExt};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointFile;
use crate::config::{Config, ErrorPolicy};
use crate::document::Document;
use crate::error::BackfillError;
use crate::jobs::BackfillJob;
use crate::report::{CollectionReport, FailurePhase, ReputationReport};
use crate::reputation::ReputationService;
use crate::scanner::{scan, CollectionScan};
use crate::store::{DocumentStore, WriteBatch};
use crate::transform::{Decision, Transform};

/// Checkpoint key for the reputation pass
pub const REPUTATION_JOB: &str = "reputation";

/// Tracing target for operator progress lines
pub const PROGRESS_TARGET: &str = "tradeya_backfill::progress";

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Scanning,
    Processing,
    Reporting,
    Done,
    Aborted,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Documents in flight at once (minimum 1)
    pub concurrency: usize,
    pub error_policy: ErrorPolicy,
    /// Log progress (and save the checkpoint) every N documents
    pub progress_every: usize,
    /// Decide and count, but write nothing
    pub dry_run: bool,
    /// Skip documents at or before the saved cursor
    pub resume: bool,
    pub checkpoint: Option<CheckpointFile>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            error_policy: ErrorPolicy::Continue,
            progress_every: 25,
            dry_run: false,
            resume: false,
            checkpoint: None,
        }
    }
}

impl RunOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.concurrency,
            error_policy: config.error_policy,
            progress_every: config.progress_every,
            checkpoint: Some(CheckpointFile::new(config.checkpoint_path())),
            ..Default::default()
        }
    }

    fn writes_checkpoint(&self) -> Option<&CheckpointFile> {
        if self.dry_run {
            None
        } else {
            self.checkpoint.as_ref()
        }
    }
}

/// How one document ended up
enum Applied {
    Updated,
    Present,
    Filtered,
}

struct Failure {
    phase: FailurePhase,
    message: String,
}

struct Outcome {
    id: String,
    result: Result<Applied, Failure>,
}

/// Decide one document and commit its single-document batch
async fn process_document(
    store: &dyn DocumentStore,
    transform: &dyn Transform,
    collection: &str,
    doc: Document,
    dry_run: bool,
) -> Outcome {
    let result = match transform.decide(&doc) {
        Err(e) => Err(Failure {
            phase: FailurePhase::Transform,
            message: e.to_string(),
        }),
        Ok(Decision::Filtered) => Ok(Applied::Filtered),
        Ok(Decision::AlreadyPresent) => Ok(Applied::Present),
        Ok(Decision::Update(fields)) if dry_run => {
            debug!(collection = %collection, id = %doc.id, fields = ?fields, "Would update");
            Ok(Applied::Updated)
        }
        Ok(Decision::Update(fields)) => store
            .commit(WriteBatch::single_merge(collection, &doc.id, fields))
            .await
            .map(|()| Applied::Updated)
            .map_err(|e| Failure {
                phase: FailurePhase::Commit,
                message: e.to_string(),
            }),
    };
    Outcome { id: doc.id, result }
}

pub struct BackfillRunner<'a> {
    store: &'a dyn DocumentStore,
    options: RunOptions,
    state: RunState,
}

impl<'a> BackfillRunner<'a> {
    pub fn new(store: &'a dyn DocumentStore, options: RunOptions) -> Self {
        Self {
            store,
            options,
            state: RunState::NotStarted,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Mark the run aborted if `result` is an error
    fn abort_on<T>(&mut self, result: Result<T, BackfillError>) -> Result<T, BackfillError> {
        if result.is_err() {
            self.state = RunState::Aborted;
        }
        result
    }

    /// In-flight window for a run. Fail-fast never lets a document after a
    /// failure reach the store, so it processes one document at a time.
    fn window(&self) -> usize {
        match self.options.error_policy {
            ErrorPolicy::FailFast => 1,
            ErrorPolicy::Continue => self.options.concurrency.max(1),
        }
    }

    async fn scan_from_cursor(&mut self, job: &str, collection: &str) -> Result<CollectionScan, BackfillError> {
        self.state = RunState::Scanning;
        let scan = match scan(self.store, collection).await {
            Ok(scan) => scan,
            Err(e) => {
                self.state = RunState::Aborted;
                error!(collection = %collection, error = %e, "Scan failed");
                return Err(e);
            }
        };

        if !self.options.resume {
            return Ok(scan);
        }
        let Some(checkpoint) = &self.options.checkpoint else {
            return Ok(scan);
        };
        match checkpoint.cursor(job).await {
            Ok(Some(cursor)) => {
                info!(job = %job, last_id = %cursor.last_id, "Resuming from checkpoint");
                Ok(scan.resume_after(&cursor.last_id))
            }
            Ok(None) => Ok(scan),
            Err(e) => {
                self.state = RunState::Aborted;
                Err(e)
            }
        }
    }

    /// Run one backfill job over its collection
    pub async fn run(&mut self, job: &BackfillJob) -> Result<CollectionReport, BackfillError> {
        let started = Instant::now();
        let mut report = CollectionReport::new(&job.name, &job.collection);
        report.dry_run = self.options.dry_run;

        let scan = self.scan_from_cursor(&job.name, &job.collection).await?;
        report.scanned = scan.total() as u64;
        report.resumed_past = (scan.total() - scan.len()) as u64;

        let window = self.window();
        let checkpoint = self.options.writes_checkpoint().cloned();
        info!(
            job = %job.name,
            collection = %job.collection,
            documents = scan.len(),
            concurrency = window,
            dry_run = self.options.dry_run,
            "Starting backfill"
        );
        self.state = RunState::Processing;

        let store = self.store;
        let transform = job.transform.as_ref();
        let collection = job.collection.as_str();
        let dry_run = self.options.dry_run;
        let mut outcomes = stream::iter(scan)
            .map(|doc| process_document(store, transform, collection, doc, dry_run))
            .buffered(window);

        let mut last_id: Option<String> = None;
        while let Some(outcome) = outcomes.next().await {
            match outcome.result {
                Ok(Applied::Updated) => report.record_updated(),
                Ok(Applied::Present) => report.record_present(),
                Ok(Applied::Filtered) => report.record_filtered(),
                Err(failure) => {
                    warn!(
                        collection = %collection,
                        id = %outcome.id,
                        phase = %failure.phase,
                        error = %failure.message,
                        "Document failed"
                    );
                    report.record_failure(&outcome.id, failure.phase, failure.message.clone());

                    if self.options.error_policy == ErrorPolicy::FailFast {
                        self.state = RunState::Aborted;
                        if let (Some(checkpoint), Some(last_id)) = (&checkpoint, last_id.as_deref()) {
                            checkpoint
                                .record(&job.name, last_id, report.resumed_past + report.processed() - 1)
                                .await?;
                        }
                        error!(
                            collection = %collection,
                            updated = report.updated,
                            skipped = report.skipped(),
                            "Aborting run on first failure"
                        );
                        return Err(BackfillError::Aborted {
                            collection: collection.to_string(),
                            id: outcome.id,
                            phase: failure.phase,
                            message: failure.message,
                            report: Box::new(report),
                        });
                    }
                }
            }
            last_id = Some(outcome.id);

            let processed = report.processed();
            if processed % self.options.progress_every.max(1) as u64 == 0 {
                info!(
                    target: PROGRESS_TARGET,
                    collection = %collection,
                    processed,
                    updated = report.updated,
                    skipped = report.skipped(),
                    failed = report.failed,
                    "Processed {} documents...",
                    processed
                );
                if let (Some(checkpoint), Some(last_id)) = (&checkpoint, last_id.as_deref()) {
                    let saved = checkpoint
                        .record(&job.name, last_id, report.resumed_past + processed)
                        .await;
                    self.abort_on(saved)?;
                }
            }
        }

        self.state = RunState::Reporting;
        if let Some(checkpoint) = &checkpoint {
            let cleared = checkpoint.clear(&job.name).await;
            self.abort_on(cleared)?;
        }
        report.complete();
        info!(
            job = %job.name,
            collection = %collection,
            updated = report.updated,
            skipped_present = report.skipped_present,
            skipped_filtered = report.skipped_filtered,
            failed = report.failed,
            duration_ms = started.elapsed().as_millis() as u64,
            "Backfill complete"
        );
        self.state = RunState::Done;
        Ok(report)
    }

    /// Recompute reputation one user at a time.
    ///
    /// With `user_ids` empty every user in `users_collection` is recomputed;
    /// otherwise only the named users, and the checkpoint is not used.
    pub async fn recompute_reputation(
        &mut self,
        service: &dyn ReputationService,
        users_collection: &str,
        user_ids: &[String],
    ) -> Result<ReputationReport, BackfillError> {
        let started = Instant::now();
        let mut report = ReputationReport::new(users_collection);

        let ids: Vec<String> = if user_ids.is_empty() {
            let scan = self.scan_from_cursor(REPUTATION_JOB, users_collection).await?;
            report.scanned = scan.total() as u64;
            report.resumed_past = (scan.total() - scan.len()) as u64;
            scan.map(|doc| doc.id).collect()
        } else {
            report.scanned = user_ids.len() as u64;
            user_ids.to_vec()
        };
        let checkpoint = if user_ids.is_empty() {
            self.options.writes_checkpoint().cloned()
        } else {
            None
        };

        info!(users = ids.len(), collection = %users_collection, "Starting reputation recompute");
        self.state = RunState::Processing;

        let mut last_id: Option<String> = None;
        for id in ids {
            if self.options.dry_run {
                debug!(user_id = %id, "Would recompute reputation");
                report.recomputed += 1;
            } else {
                match service.recompute_user_reputation(&id).await {
                    Ok(_) => report.recomputed += 1,
                    Err(e) => {
                        warn!(user_id = %id, error = %e, "Reputation recompute failed");
                        report.record_failure(&id, e.to_string());
                        if self.options.error_policy == ErrorPolicy::FailFast {
                            self.state = RunState::Aborted;
                            if let (Some(checkpoint), Some(last_id)) = (&checkpoint, last_id.as_deref()) {
                                checkpoint
                                    .record(REPUTATION_JOB, last_id, report.resumed_past + report.processed() - 1)
                                    .await?;
                            }
                            error!(
                                recomputed = report.recomputed,
                                "Aborting reputation recompute on first failure"
                            );
                            report.completed_at = Some(chrono::Utc::now());
                            return Err(BackfillError::ReputationAborted {
                                collection: users_collection.to_string(),
                                id,
                                message: e.to_string(),
                                report: Box::new(report),
                            });
                        }
                    }
                }
            }

            last_id = Some(id);

            let processed = report.processed();
            if processed % self.options.progress_every.max(1) as u64 == 0 {
                info!(target: PROGRESS_TARGET, "Processed {} users...", processed);
                if let (Some(checkpoint), Some(last_id)) = (&checkpoint, last_id.as_deref()) {
                    let saved = checkpoint
                        .record(REPUTATION_JOB, last_id, report.resumed_past + processed)
                        .await;
                    self.abort_on(saved)?;
                }
            }
        }

        self.state = RunState::Reporting;
        if let Some(checkpoint) = &checkpoint {
            let cleared = checkpoint.clear(REPUTATION_JOB).await;
            self.abort_on(cleared)?;
        }
        report.completed_at = Some(chrono::Utc::now());
        info!(
            recomputed = report.recomputed,
            failed = report.failed,
            duration_ms = started.elapsed().as_millis() as u64,
            "Reputation recompute complete"
        );
        self.state = RunState::Done;
        Ok(report)
    }
}
