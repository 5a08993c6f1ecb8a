//! In-memory document store, used for dry rehearsals and tests

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::RwLock;

use super::{validate_collection, DocumentStore, WriteBatch, WriteOp};
use crate::document::{merge_fields, Document};
use crate::error::StoreError;

type Collections = BTreeMap<String, BTreeMap<String, Value>>;

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from `(collection, document)` pairs
    pub fn with_documents<I>(docs: I) -> Self
    where
        I: IntoIterator<Item = (String, Document)>,
    {
        let mut collections = Collections::new();
        for (collection, doc) in docs {
            collections
                .entry(collection)
                .or_default()
                .insert(doc.id, doc.fields);
        }
        Self {
            collections: RwLock::new(collections),
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        validate_collection(collection)?;
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        validate_collection(collection)?;
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| Document::new(id, fields.clone())))
    }

    async fn collections(&self) -> Result<Vec<String>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .iter()
            .filter(|(_, docs)| !docs.is_empty())
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        for op in batch.ops() {
            validate_collection(op.collection())?;
        }

        let mut collections = self.collections.write().await;
        // Check every merge target before touching anything, so a failing op
        // leaves the store as it was.
        let mut created: HashSet<(&str, &str)> = HashSet::new();
        for op in batch.ops() {
            match op {
                WriteOp::Merge { collection, id, .. } => {
                    let exists = created.contains(&(collection.as_str(), id.as_str()))
                        || collections
                            .get(collection)
                            .is_some_and(|docs| docs.contains_key(id));
                    if !exists {
                        return Err(StoreError::NotFound {
                            collection: collection.clone(),
                            id: id.clone(),
                        });
                    }
                }
                WriteOp::Put {
                    collection,
                    document,
                } => {
                    created.insert((collection.as_str(), document.id.as_str()));
                }
            }
        }

        for op in batch.ops() {
            match op {
                WriteOp::Merge {
                    collection,
                    id,
                    fields,
                } => {
                    if let Some(current) = collections
                        .get_mut(collection)
                        .and_then(|docs| docs.get_mut(id))
                    {
                        merge_fields(current, fields);
                    }
                }
                WriteOp::Put {
                    collection,
                    document,
                } => {
                    collections
                        .entry(collection.clone())
                        .or_default()
                        .insert(document.id.clone(), document.fields.clone());
                }
            }
        }
        Ok(())
    }
}
