//! Embedded document store backed by sled
//!
//! All collections share one tree. Keys are `{collection}:{id}` so a prefix
//! scan returns a collection in ascending id order, and a single-tree
//! transaction can cover a batch that touches several collections.

use async_trait::async_trait;
use serde_json::Value;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};

use super::{validate_collection, DocumentStore, WriteBatch, WriteOp};
use crate::document::{merge_fields, Document};
use crate::error::StoreError;

const DOCUMENTS_TREE: &str = "documents";

/// Document store backed by sled
#[derive(Debug)]
pub struct SledStore {
    db: sled::Db,
    docs: sled::Tree,
}

impl SledStore {
    /// Open or create a store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path.as_ref())?;
        let docs = db.open_tree(DOCUMENTS_TREE)?;
        info!(path = %path.as_ref().display(), "Opened document store");
        Ok(Self { db, docs })
    }

    /// Number of documents across all collections
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

fn storage_key(collection: &str, id: &str) -> String {
    format!("{}:{}", collection, id)
}

fn encode(value: &Value) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode(bytes: &[u8]) -> Result<Value, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn abort<T>(err: StoreError) -> Result<T, ConflictableTransactionError<StoreError>> {
    Err(ConflictableTransactionError::Abort(err))
}

#[async_trait]
impl DocumentStore for SledStore {
    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        validate_collection(collection)?;
        let prefix = format!("{}:", collection);
        let mut docs = Vec::new();
        for item in self.docs.scan_prefix(prefix.as_bytes()) {
            let (key, value) = item?;
            let id = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            docs.push(Document::new(id, decode(&value)?));
        }
        debug!(collection = %collection, count = docs.len(), "Listed collection");
        Ok(docs)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        validate_collection(collection)?;
        match self.docs.get(storage_key(collection, id).as_bytes())? {
            Some(bytes) => Ok(Some(Document::new(id, decode(&bytes)?))),
            None => Ok(None),
        }
    }

    async fn collections(&self) -> Result<Vec<String>, StoreError> {
        let mut names = BTreeSet::new();
        for key in self.docs.iter().keys() {
            let key = key?;
            let key = String::from_utf8_lossy(&key);
            if let Some((collection, _)) = key.split_once(':') {
                names.insert(collection.to_string());
            }
        }
        Ok(names.into_iter().collect())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        for op in batch.ops() {
            validate_collection(op.collection())?;
        }

        let result: Result<(), TransactionError<StoreError>> = self.docs.transaction(|tx| {
            for op in batch.ops() {
                let key = storage_key(op.collection(), op.id());
                match op {
                    WriteOp::Merge {
                        collection,
                        id,
                        fields,
                    } => {
                        let Some(current) = tx.get(key.as_bytes())? else {
                            return abort(StoreError::NotFound {
                                collection: collection.clone(),
                                id: id.clone(),
                            });
                        };
                        let mut value = match decode(&current) {
                            Ok(value) => value,
                            Err(e) => return abort(e),
                        };
                        merge_fields(&mut value, fields);
                        let bytes = match encode(&value) {
                            Ok(bytes) => bytes,
                            Err(e) => return abort(e),
                        };
                        tx.insert(key.as_bytes(), bytes)?;
                    }
                    WriteOp::Put { document, .. } => {
                        let bytes = match encode(&document.fields) {
                            Ok(bytes) => bytes,
                            Err(e) => return abort(e),
                        };
                        tx.insert(key.as_bytes(), bytes)?;
                    }
                }
            }
            Ok(())
        });

        match result {
            Ok(()) => {}
            Err(TransactionError::Abort(e)) => return Err(e),
            Err(TransactionError::Storage(e)) => return Err(StoreError::Database(e)),
        }

        self.db.flush_async().await?;
        debug!(ops = batch.len(), "Committed write batch");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn open_temp() -> (SledStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SledStore::open(dir.path().join("store.sled")).unwrap();
        (store, dir)
    }

    fn seed(collection: &str, id: &str, fields: Value) -> WriteBatch {
        let mut batch = WriteBatch::new();
        batch.put(collection, Document::new(id, fields));
        batch
    }

    #[tokio::test]
    async fn test_list_is_ordered_and_scoped_to_collection() {
        let (store, _dir) = open_temp();
        let mut batch = WriteBatch::new();
        batch
            .put("trades", Document::new("t2", json!({"status": "open"})))
            .put("trades", Document::new("t1", json!({"status": "active"})))
            .put("tradesArchive", Document::new("x", json!({})))
            .put("users", Document::new("u1", json!({})));
        store.commit(batch).await.unwrap();

        let trades = store.list("trades").await.unwrap();
        let ids: Vec<_> = trades.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2"]);

        let collections = store.collections().await.unwrap();
        assert_eq!(collections, vec!["trades", "tradesArchive", "users"]);
    }

    #[tokio::test]
    async fn test_merge_missing_document_aborts_whole_batch() {
        let (store, _dir) = open_temp();
        store
            .commit(seed("trades", "t1", json!({"status": "active"})))
            .await
            .unwrap();

        let mut batch = WriteBatch::new();
        batch
            .merge("trades", "t1", json!({"visibility": "public"}).as_object().unwrap().clone())
            .merge("trades", "missing", json!({"visibility": "public"}).as_object().unwrap().clone());

        let err = store.commit(batch).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));

        let t1 = store.get("trades", "t1").await.unwrap().unwrap();
        assert!(!t1.has_field("visibility"));
    }

    #[tokio::test]
    async fn test_ids_may_contain_separator() {
        let (store, _dir) = open_temp();
        store
            .commit(seed("users", "auth0:42", json!({"name": "Ada"})))
            .await
            .unwrap();

        let users = store.list("users").await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, "auth0:42");
        assert!(store.get("users", "auth0:42").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_find_by_field() {
        let (store, _dir) = open_temp();
        let mut batch = WriteBatch::new();
        batch
            .put("reputationEvents", Document::new("e1", json!({"userId": "u1", "points": 5})))
            .put("reputationEvents", Document::new("e2", json!({"userId": "u2", "points": 3})))
            .put("reputationEvents", Document::new("e3", json!({"userId": "u1", "points": 2})));
        store.commit(batch).await.unwrap();

        let events = store
            .find_by_field("reputationEvents", "userId", &json!("u1"))
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_reopen_persists_documents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.sled");
        {
            let store = SledStore::open(&path).unwrap();
            store
                .commit(seed("collaborations", "c1", json!({"title": "Mural"})))
                .await
                .unwrap();
        }
        let store = SledStore::open(&path).unwrap();
        assert_eq!(store.len(), 1);
    }
}
