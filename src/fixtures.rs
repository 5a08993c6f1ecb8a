//! Fixture import
//!
//! Loads a JSON export into the store, for rehearsing a backfill against a
//! copy of production data. The file maps collection names to arrays of
//! records, each carrying its document id in `id`:
//!
//! ```json
//! {
//!   "trades": [{ "id": "t1", "status": "active" }],
//!   "users":  [{ "id": "u1", "displayName": "Ada" }]
//! }
//! ```

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::document::Document;
use crate::error::BackfillError;
use crate::store::{validate_collection, DocumentStore, WriteBatch, MAX_BATCH_OPS};

/// Split a fixture value into `(collection, document)` pairs.
///
/// The whole file is validated before anything is written.
pub fn parse_fixtures(value: Value) -> Result<Vec<(String, Document)>, BackfillError> {
    let Value::Object(collections) = value else {
        return Err(BackfillError::Config(
            "fixture file must be an object of collection arrays".into(),
        ));
    };

    let mut docs = Vec::new();
    for (collection, records) in collections {
        validate_collection(&collection)?;
        let Value::Array(records) = records else {
            return Err(BackfillError::Config(format!(
                "fixture collection '{}' is not an array",
                collection
            )));
        };
        for (index, record) in records.into_iter().enumerate() {
            let Value::Object(mut fields) = record else {
                return Err(BackfillError::Config(format!(
                    "{}[{}] is not an object",
                    collection, index
                )));
            };
            let id = match fields.remove("id") {
                Some(Value::String(id)) if !id.is_empty() => id,
                _ => {
                    return Err(BackfillError::Config(format!(
                        "{}[{}] has no string id",
                        collection, index
                    )))
                }
            };
            docs.push((collection.clone(), Document::new(id, Value::Object(fields))));
        }
    }
    Ok(docs)
}

/// Import a fixture file, returning the number of documents per collection
pub async fn import_fixtures(
    store: &dyn DocumentStore,
    path: &Path,
) -> Result<BTreeMap<String, u64>, BackfillError> {
    let bytes = tokio::fs::read(path).await?;
    let docs = parse_fixtures(serde_json::from_slice(&bytes)?)?;

    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for chunk in docs.chunks(MAX_BATCH_OPS) {
        let mut batch = WriteBatch::new();
        for (collection, doc) in chunk {
            batch.put(collection, doc.clone());
            *counts.entry(collection.clone()).or_default() += 1;
        }
        store.commit(batch).await?;
    }

    info!(
        path = %path.display(),
        documents = docs.len(),
        collections = counts.len(),
        "Imported fixtures"
    );
    Ok(counts)
}
