//! Collection scanner
//!
//! Fetches a whole collection in one request and hands it out one document
//! at a time. A scan is consumed as it is iterated; walking the collection
//! again needs a fresh [`scan`].

use tracing::{debug, info};

use crate::document::Document;
use crate::error::BackfillError;
use crate::store::DocumentStore;

/// Snapshot of one collection, yielded in ascending id order
#[derive(Debug)]
pub struct CollectionScan {
    collection: String,
    total: usize,
    docs: std::vec::IntoIter<Document>,
}

impl CollectionScan {
    fn new(collection: &str, mut docs: Vec<Document>) -> Self {
        // Backends may return any order; resume cursors rely on id order.
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            collection: collection.to_string(),
            total: docs.len(),
            docs: docs.into_iter(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Number of documents in the snapshot, before any resume skipping
    pub fn total(&self) -> usize {
        self.total
    }

    /// Drop every remaining document whose id is `<= cursor`
    pub fn resume_after(self, cursor: &str) -> Self {
        let remaining: Vec<Document> = self.docs.filter(|doc| doc.id.as_str() > cursor).collect();
        debug!(
            collection = %self.collection,
            cursor = %cursor,
            remaining = remaining.len(),
            "Resuming scan after cursor"
        );
        Self {
            collection: self.collection,
            total: self.total,
            docs: remaining.into_iter(),
        }
    }
}

impl Iterator for CollectionScan {
    type Item = Document;

    fn next(&mut self) -> Option<Self::Item> {
        self.docs.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.docs.size_hint()
    }
}

impl ExactSizeIterator for CollectionScan {}

/// Request the full snapshot of `collection`
pub async fn scan(store: &dyn DocumentStore, collection: &str) -> Result<CollectionScan, BackfillError> {
    let docs = store
        .list(collection)
        .await
        .map_err(|source| BackfillError::Scan {
            collection: collection.to_string(),
            source,
        })?;
    info!(collection = %collection, documents = docs.len(), "Scanned collection");
    Ok(CollectionScan::new(collection, docs))
}
