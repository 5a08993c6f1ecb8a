//! Reputation recompute over the sled store

use async_trait::async_trait;
use serde_json::{json, Number, Value};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;

use tradeya_backfill::runner::{PROGRESS_TARGET, REPUTATION_JOB};
use tradeya_backfill::{
    BackfillError, BackfillRunner, CheckpointFile, Document, DocumentStore, ErrorPolicy,
    EventLogReputation, ReputationConfig, ReputationScore, ReputationService, RunOptions, RunState,
    SledStore, StoreError, WriteBatch,
};

async fn create_store(docs: &[(&str, &str, Value)]) -> (SledStore, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let store = SledStore::open(temp_dir.path().join("store.sled")).unwrap();
    let mut batch = WriteBatch::new();
    for (collection, id, fields) in docs {
        batch.put(collection, Document::new(*id, fields.clone()));
    }
    store.commit(batch).await.unwrap();
    (store, temp_dir)
}

/// Records calls and fails for chosen users
struct ScriptedService {
    fail_for: Vec<String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedService {
    fn new(fail_for: &[&str]) -> Self {
        Self {
            fail_for: fail_for.iter().map(|s| s.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ReputationService for ScriptedService {
    async fn recompute_user_reputation(&self, user_id: &str) -> Result<ReputationScore, BackfillError> {
        self.calls.lock().unwrap().push(user_id.to_string());
        if self.fail_for.iter().any(|id| id == user_id) {
            return Err(BackfillError::Config(format!("no ledger for {}", user_id)));
        }
        Ok(ReputationScore {
            score: Number::from(0),
            events: 0,
        })
    }
}

#[tokio::test]
async fn test_recompute_twice_stores_same_score() {
    let (store, _temp) = create_store(&[
        ("users", "u1", json!({"displayName": "Ada", "reputationScore": 999})),
        ("users", "u2", json!({"displayName": "Lin"})),
        ("reputationEvents", "e1", json!({"userId": "u1", "points": 10, "type": "trade_completed"})),
        ("reputationEvents", "e2", json!({"userId": "u1", "points": 5, "type": "endorsement"})),
        ("reputationEvents", "e3", json!({"userId": "u2", "points": 2, "type": "endorsement"})),
    ])
    .await;
    let service = EventLogReputation::new(&store, ReputationConfig::default());

    let first = BackfillRunner::new(&store, RunOptions::default())
        .recompute_reputation(&service, "users", &[])
        .await
        .unwrap();
    assert_eq!(first.recomputed, 2);
    let after_first = store.get("users", "u1").await.unwrap().unwrap();
    assert_eq!(after_first.get("reputationScore"), Some(&json!(15)));

    let second = BackfillRunner::new(&store, RunOptions::default())
        .recompute_reputation(&service, "users", &[])
        .await
        .unwrap();
    assert_eq!(second.recomputed, 2);
    let after_second = store.get("users", "u1").await.unwrap().unwrap();
    assert_eq!(after_first, after_second);

    let u2 = store.get("users", "u2").await.unwrap().unwrap();
    assert_eq!(u2.get("reputationScore"), Some(&json!(2)));
}

#[tokio::test]
async fn test_fail_fast_recompute_stops_at_first_error() {
    let (store, temp) = create_store(&[
        ("users", "u1", json!({})),
        ("users", "u2", json!({})),
        ("users", "u3", json!({})),
    ])
    .await;
    let service = ScriptedService::new(&["u2"]);
    let checkpoint = CheckpointFile::new(temp.path().join("checkpoint.json"));
    let options = RunOptions {
        error_policy: ErrorPolicy::FailFast,
        checkpoint: Some(checkpoint.clone()),
        ..Default::default()
    };
    let mut runner = BackfillRunner::new(&store, options);

    let err = runner
        .recompute_reputation(&service, "users", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, BackfillError::ReputationAborted { ref id, .. } if id == "u2"));
    assert_eq!(runner.state(), RunState::Aborted);
    assert_eq!(*service.calls.lock().unwrap(), vec!["u1", "u2"]);

    let partial = err.partial_reputation_report().unwrap();
    assert_eq!(partial.recomputed, 1);
    assert_eq!(partial.failed, 1);
    assert_eq!(partial.failures[0].id, "u2");

    let cursor = checkpoint.cursor(REPUTATION_JOB).await.unwrap().unwrap();
    assert_eq!(cursor.last_id, "u1");
    assert_eq!(cursor.processed, 1);
}

#[tokio::test]
async fn test_continue_recompute_reports_failures() {
    let (store, _temp) = create_store(&[
        ("users", "u1", json!({})),
        ("users", "u2", json!({})),
        ("users", "u3", json!({})),
    ])
    .await;
    let service = ScriptedService::new(&["u2"]);

    let report = BackfillRunner::new(&store, RunOptions::default())
        .recompute_reputation(&service, "users", &[])
        .await
        .unwrap();
    assert_eq!(report.recomputed, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].id, "u2");
    assert_eq!(*service.calls.lock().unwrap(), vec!["u1", "u2", "u3"]);
}

#[tokio::test]
async fn test_named_users_only() {
    let (store, _temp) = create_store(&[("users", "u1", json!({})), ("users", "u2", json!({}))]).await;
    let service = ScriptedService::new(&[]);

    let report = BackfillRunner::new(&store, RunOptions::default())
        .recompute_reputation(&service, "users", &["u2".to_string()])
        .await
        .unwrap();
    assert_eq!(report.recomputed, 1);
    assert_eq!(*service.calls.lock().unwrap(), vec!["u2"]);
}

#[tokio::test]
async fn test_dry_run_calls_nothing() {
    let (store, _temp) = create_store(&[("users", "u1", json!({}))]).await;
    let service = ScriptedService::new(&[]);
    let options = RunOptions {
        dry_run: true,
        ..Default::default()
    };

    let report = BackfillRunner::new(&store, options)
        .recompute_reputation(&service, "users", &[])
        .await
        .unwrap();
    assert_eq!(report.recomputed, 1);
    assert!(service.calls.lock().unwrap().is_empty());
}

/// Captures formatted log output
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[tokio::test]
async fn test_progress_logged_every_25_users() {
    let users: Vec<(String, Value)> = (0..60).map(|i| (format!("u{:02}", i), json!({}))).collect();
    let docs: Vec<(&str, &str, Value)> = users
        .iter()
        .map(|(id, fields)| ("users", id.as_str(), fields.clone()))
        .collect();
    let (store, _temp) = create_store(&docs).await;
    let service = ScriptedService::new(&[]);

    // Only the progress target, as routed to stdout by the binary.
    let logs = LogBuffer::default();
    let subscriber = tracing_subscriber::registry().with(
        tracing_subscriber::fmt::layer()
            .with_writer(logs.clone())
            .with_ansi(false)
            .with_filter(filter_fn(|meta| meta.target() == PROGRESS_TARGET)),
    );
    let _guard = tracing::subscriber::set_default(subscriber);

    let report = BackfillRunner::new(&store, RunOptions::default())
        .recompute_reputation(&service, "users", &[])
        .await
        .unwrap();
    assert_eq!(report.recomputed, 60);

    let output = logs.contents();
    let ticks: Vec<&str> = output.lines().collect();
    assert_eq!(ticks.len(), 2, "unexpected progress output: {}", output);
    assert!(ticks[0].contains("Processed 25 users..."));
    assert!(ticks[1].contains("Processed 50 users..."));
}

/// Counts full listings of one collection
struct CountingStore {
    inner: SledStore,
    collection: &'static str,
    lists: AtomicUsize,
}

#[async_trait]
impl DocumentStore for CountingStore {
    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        if collection == self.collection {
            self.lists.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.list(collection).await
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.inner.get(collection, id).await
    }

    async fn collections(&self) -> Result<Vec<String>, StoreError> {
        self.inner.collections().await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.inner.commit(batch).await
    }
}

#[tokio::test]
async fn test_full_pass_reads_event_log_once() {
    let (inner, _temp) = create_store(&[
        ("users", "u1", json!({})),
        ("users", "u2", json!({})),
        ("users", "u3", json!({})),
        ("reputationEvents", "e1", json!({"userId": "u1", "points": 4})),
        ("reputationEvents", "e2", json!({"userId": "u3", "points": 9})),
        ("reputationEvents", "e3", json!({"userId": "u1", "points": 1})),
    ])
    .await;
    let store = CountingStore {
        inner,
        collection: "reputationEvents",
        lists: AtomicUsize::new(0),
    };
    let mut service = EventLogReputation::new(&store, ReputationConfig::default());
    assert_eq!(service.index_events().await.unwrap(), 2);

    let report = BackfillRunner::new(&store, RunOptions::default())
        .recompute_reputation(&service, "users", &[])
        .await
        .unwrap();
    assert_eq!(report.recomputed, 3);
    assert_eq!(store.lists.load(Ordering::SeqCst), 1);

    let u1 = store.get("users", "u1").await.unwrap().unwrap();
    assert_eq!(u1.get("reputationScore"), Some(&json!(5)));
    let u2 = store.get("users", "u2").await.unwrap().unwrap();
    assert_eq!(u2.get("reputationScore"), Some(&json!(0)));
}
