//! Error types for tradeya-backfill

use thiserror::Error;

use crate::report::{CollectionReport, FailurePhase, ReputationReport};

/// Errors raised by a document store backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Invalid collection name: {0}")]
    InvalidCollection(String),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised while deciding what to write for one document
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Malformed field '{field}': {reason}")]
    Malformed { field: String, reason: String },

    #[error("{0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum BackfillError {
    #[error("Store initialization failed: {0}")]
    Init(String),

    #[error("Scan of collection '{collection}' failed: {source}")]
    Scan {
        collection: String,
        #[source]
        source: StoreError,
    },

    #[error("Document {collection}/{id} failed during {phase}: {message}")]
    Document {
        collection: String,
        id: String,
        phase: FailurePhase,
        message: String,
    },

    #[error("Run over '{collection}' aborted at document {id} ({phase}): {message}")]
    Aborted {
        collection: String,
        id: String,
        phase: FailurePhase,
        message: String,
        report: Box<CollectionReport>,
    },

    #[error("Reputation recompute over '{collection}' aborted at user {id}: {message}")]
    ReputationAborted {
        collection: String,
        id: String,
        message: String,
        report: Box<ReputationReport>,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Backup not found: {0}")]
    BackupNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BackfillError {
    /// Partial report carried by an aborted run
    pub fn partial_report(&self) -> Option<&CollectionReport> {
        match self {
            BackfillError::Aborted { report, .. } => Some(report),
            _ => None,
        }
    }

    /// Partial tally carried by an aborted reputation recompute
    pub fn partial_reputation_report(&self) -> Option<&ReputationReport> {
        match self {
            BackfillError::ReputationAborted { report, .. } => Some(report),
            _ => None,
        }
    }
}
