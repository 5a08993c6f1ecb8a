//! Pre-migration backups and rollback
//!
//! A backup is a JSON snapshot of whole collections written under the
//! backups directory as `{id}.json`. Rolling back overwrites every document
//! in the snapshot with its saved value. Documents created after the backup
//! are not removed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::document::Document;
use crate::error::BackfillError;
use crate::scanner::scan;
use crate::store::{DocumentStore, WriteBatch, MAX_BATCH_OPS};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backup {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub collections: BTreeMap<String, Vec<Document>>,
}

impl Backup {
    pub fn document_count(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollbackReport {
    pub backup_id: String,
    /// Documents restored per collection
    pub restored: BTreeMap<String, u64>,
}

impl RollbackReport {
    pub fn total(&self) -> u64 {
        self.restored.values().sum()
    }
}

fn backup_path(dir: &Path, id: &str) -> Result<PathBuf, BackfillError> {
    if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
        return Err(BackfillError::BackupNotFound(id.to_string()));
    }
    Ok(dir.join(format!("{}.json", id)))
}

/// Snapshot `collections` (every collection when empty) into `dir`
pub async fn create_backup(
    store: &dyn DocumentStore,
    collections: &[String],
    dir: &Path,
) -> Result<Backup, BackfillError> {
    let names = if collections.is_empty() {
        store.collections().await?
    } else {
        collections.to_vec()
    };

    let created_at = Utc::now();
    let id = created_at.format("%Y%m%dT%H%M%SZ").to_string();
    let path = backup_path(dir, &id)?;
    if tokio::fs::try_exists(&path).await? {
        return Err(BackfillError::Config(format!(
            "backup {} already exists at {}",
            id,
            path.display()
        )));
    }

    let mut snapshot = BTreeMap::new();
    for name in names {
        let docs: Vec<Document> = scan(store, &name).await?.collect();
        info!(collection = %name, documents = docs.len(), "Backed up collection");
        snapshot.insert(name, docs);
    }

    let backup = Backup {
        id,
        created_at,
        collections: snapshot,
    };
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(&path, serde_json::to_vec(&backup)?).await?;
    info!(
        backup_id = %backup.id,
        documents = backup.document_count(),
        path = %path.display(),
        "Backup written"
    );
    Ok(backup)
}

pub async fn load_backup(dir: &Path, id: &str) -> Result<Backup, BackfillError> {
    let path = backup_path(dir, id)?;
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(BackfillError::BackupNotFound(id.to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_slice(&bytes)?)
}

/// Backup ids in `dir`, oldest first
pub async fn list_backups(dir: &Path) -> Result<Vec<String>, BackfillError> {
    let mut ids = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            if let Some(stem) = path.file_stem() {
                ids.push(stem.to_string_lossy().into_owned());
            }
        }
    }
    ids.sort();
    Ok(ids)
}

/// Restore every document in backup `id`
pub async fn rollback(store: &dyn DocumentStore, dir: &Path, id: &str) -> Result<RollbackReport, BackfillError> {
    let backup = load_backup(dir, id).await?;
    let mut report = RollbackReport {
        backup_id: backup.id.clone(),
        ..Default::default()
    };

    for (collection, docs) in backup.collections {
        for chunk in docs.chunks(MAX_BATCH_OPS) {
            let mut batch = WriteBatch::new();
            for doc in chunk {
                batch.put(&collection, doc.clone());
            }
            store.commit(batch).await?;
            *report.restored.entry(collection.clone()).or_default() += chunk.len() as u64;
        }
        info!(
            backup_id = %id,
            collection = %collection,
            restored = report.restored.get(&collection).copied().unwrap_or(0),
            "Restored collection"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_backup_then_rollback_restores_values() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::with_documents([
            ("trades".to_string(), Document::new("t1", json!({"status": "active"}))),
            ("users".to_string(), Document::new("u1", json!({"reputationScore": 3}))),
        ]);

        let backup = create_backup(&store, &["trades".to_string()], dir.path()).await.unwrap();
        assert_eq!(backup.document_count(), 1);
        assert_eq!(list_backups(dir.path()).await.unwrap(), vec![backup.id.clone()]);

        store
            .commit(WriteBatch::single_merge(
                "trades",
                "t1",
                json!({"visibility": "public"}).as_object().unwrap().clone(),
            ))
            .await
            .unwrap();

        let report = rollback(&store, dir.path(), &backup.id).await.unwrap();
        assert_eq!(report.total(), 1);
        let t1 = store.get("trades", "t1").await.unwrap().unwrap();
        assert_eq!(t1.fields, json!({"status": "active"}));
    }

    #[tokio::test]
    async fn test_unknown_backup() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let err = rollback(&store, dir.path(), "20240101T000000Z").await.unwrap_err();
        assert!(matches!(err, BackfillError::BackupNotFound(_)));

        let err = rollback(&store, dir.path(), "../etc/passwd").await.unwrap_err();
        assert!(matches!(err, BackfillError::BackupNotFound(_)));
    }

    #[tokio::test]
    async fn test_list_backups_missing_dir() {
        let dir = TempDir::new().unwrap();
        assert!(list_backups(&dir.path().join("none")).await.unwrap().is_empty());
    }
}
