//! Document store abstraction
//!
//! The backfill tools only need four things from the backing database: a
//! full snapshot of a collection, point reads, an equality lookup for the
//! reputation event log, and atomic commit of a write batch. Anything that
//! can provide those (the embedded sled store, the in-memory store, a hosted
//! document database client) implements [`DocumentStore`].
//!
//! ```text
//! scan ──► transform ──► WriteBatch ──► commit
//! ```

pub mod memory;
pub mod sled_store;

use async_trait::async_trait;
use serde_json::Value;

use crate::document::{Document, FieldMap};
use crate::error::StoreError;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

/// Operations per batch for bulk restores and imports
pub const MAX_BATCH_OPS: usize = 100;

/// A single mutation inside a [`WriteBatch`]
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Merge fields into an existing document. Fails if the document is absent.
    Merge {
        collection: String,
        id: String,
        fields: FieldMap,
    },
    /// Overwrite (or create) a whole document
    Put {
        collection: String,
        document: Document,
    },
}

impl WriteOp {
    pub fn collection(&self) -> &str {
        match self {
            WriteOp::Merge { collection, .. } | WriteOp::Put { collection, .. } => collection,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            WriteOp::Merge { id, .. } => id,
            WriteOp::Put { document, .. } => &document.id,
        }
    }
}

/// Ordered group of mutations committed atomically
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Batch holding exactly one merge
    pub fn single_merge(collection: &str, id: &str, fields: FieldMap) -> Self {
        let mut batch = Self::new();
        batch.merge(collection, id, fields);
        batch
    }

    pub fn merge(&mut self, collection: &str, id: &str, fields: FieldMap) -> &mut Self {
        self.ops.push(WriteOp::Merge {
            collection: collection.to_string(),
            id: id.to_string(),
            fields,
        });
        self
    }

    pub fn put(&mut self, collection: &str, document: Document) -> &mut Self {
        self.ops.push(WriteOp::Put {
            collection: collection.to_string(),
            document,
        });
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Backing document database
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Full snapshot of a collection, fetched in one request
    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError>;

    /// Snapshot read of a single document
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Names of all collections currently holding documents
    async fn collections(&self) -> Result<Vec<String>, StoreError>;

    /// Atomically apply every operation in the batch, or none of them
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Documents whose `field` equals `value`.
    ///
    /// Backends with secondary indexes should override this; the default
    /// filters a full snapshot.
    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Document>, StoreError> {
        let docs = self.list(collection).await?;
        Ok(docs
            .into_iter()
            .filter(|doc| doc.get(field) == Some(value))
            .collect())
    }
}

/// Collection names are used as key prefixes and must not contain the separator
pub(crate) fn validate_collection(name: &str) -> Result<(), StoreError> {
    if name.is_empty() || name.contains(':') {
        return Err(StoreError::InvalidCollection(name.to_string()));
    }
    Ok(())
}
