//! Reputation recomputation
//!
//! A user's `reputationScore` is a materialized view over the append-only
//! reputation event log. Recomputing reads every event for the user, sums
//! the points, and overwrites the derived fields on the user record. With
//! no new events in between, two recomputes store the same score.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Number, Value};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::document::{Document, FieldMap};
use crate::error::{BackfillError, TransformError};
use crate::store::{DocumentStore, WriteBatch};

/// Where the event log and derived fields live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationConfig {
    #[serde(default = "default_users_collection")]
    pub users_collection: String,
    #[serde(default = "default_events_collection")]
    pub events_collection: String,
    /// Event field holding the user id
    #[serde(default = "default_user_field")]
    pub user_field: String,
    /// Event field holding the point delta
    #[serde(default = "default_points_field")]
    pub points_field: String,
    /// User field receiving the recomputed score
    #[serde(default = "default_score_field")]
    pub score_field: String,
    /// User field receiving the number of events folded in
    #[serde(default = "default_count_field")]
    pub count_field: String,
}

fn default_users_collection() -> String {
    "users".to_string()
}

fn default_events_collection() -> String {
    "reputationEvents".to_string()
}

fn default_user_field() -> String {
    "userId".to_string()
}

fn default_points_field() -> String {
    "points".to_string()
}

fn default_score_field() -> String {
    "reputationScore".to_string()
}

fn default_count_field() -> String {
    "reputationEventCount".to_string()
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            users_collection: default_users_collection(),
            events_collection: default_events_collection(),
            user_field: default_user_field(),
            points_field: default_points_field(),
            score_field: default_score_field(),
            count_field: default_count_field(),
        }
    }
}

/// Result of one recompute
#[derive(Debug, Clone, PartialEq)]
pub struct ReputationScore {
    pub score: Number,
    pub events: u64,
}

/// Re-derives and stores a user's reputation
#[async_trait]
pub trait ReputationService: Send + Sync {
    async fn recompute_user_reputation(&self, user_id: &str) -> Result<ReputationScore, BackfillError>;
}

/// Recompute by summing `points` over the user's events in the store
pub struct EventLogReputation<'a> {
    store: &'a dyn DocumentStore,
    config: ReputationConfig,
    /// Events grouped by user, when loaded up front for a full pass
    events_by_user: Option<HashMap<String, Vec<Document>>>,
}

impl<'a> EventLogReputation<'a> {
    pub fn new(store: &'a dyn DocumentStore, config: ReputationConfig) -> Self {
        Self {
            store,
            config,
            events_by_user: None,
        }
    }

    pub fn config(&self) -> &ReputationConfig {
        &self.config
    }

    /// Read the event log once and group it by user.
    ///
    /// Later recomputes take their events from the grouping instead of
    /// querying the store per user. Returns the number of users with events.
    pub async fn index_events(&mut self) -> Result<usize, BackfillError> {
        let events = self.store.list(&self.config.events_collection).await?;
        let total = events.len();
        let mut grouped: HashMap<String, Vec<Document>> = HashMap::new();
        for event in events {
            if let Some(user_id) = event.str_field(&self.config.user_field) {
                let user_id = user_id.to_string();
                grouped.entry(user_id).or_default().push(event);
            }
        }
        let users = grouped.len();
        info!(events = total, users, "Indexed reputation events");
        self.events_by_user = Some(grouped);
        Ok(users)
    }

    async fn events_for(&self, user_id: &str) -> Result<Vec<Document>, BackfillError> {
        match &self.events_by_user {
            Some(grouped) => Ok(grouped.get(user_id).cloned().unwrap_or_default()),
            None => Ok(self
                .store
                .find_by_field(
                    &self.config.events_collection,
                    &self.config.user_field,
                    &json!(user_id),
                )
                .await?),
        }
    }
}

/// Integer sum while every delta is an integer, float sum otherwise
fn sum_points(events: &[Document], points_field: &str) -> Result<Number, TransformError> {
    let mut int_total: Option<i64> = Some(0);
    let mut float_total = 0.0f64;

    for event in events {
        let points = event
            .get(points_field)
            .and_then(|value| match value {
                Value::Number(points) => Some(points),
                _ => None,
            })
            .ok_or_else(|| TransformError::Malformed {
                field: points_field.to_string(),
                reason: format!("event {} has no numeric points", event.id),
            })?;

        float_total += points.as_f64().unwrap_or(0.0);
        int_total = match (int_total, points.as_i64()) {
            (Some(total), Some(delta)) => total.checked_add(delta),
            _ => None,
        };
    }

    match int_total {
        Some(total) => Ok(Number::from(total)),
        None => Number::from_f64(float_total).ok_or_else(|| TransformError::Malformed {
            field: points_field.to_string(),
            reason: "score is not a finite number".to_string(),
        }),
    }
}

#[async_trait]
impl ReputationService for EventLogReputation<'_> {
    async fn recompute_user_reputation(&self, user_id: &str) -> Result<ReputationScore, BackfillError> {
        let events = self.events_for(user_id).await?;

        let score = sum_points(&events, &self.config.points_field)?;
        let count = events.len() as u64;

        let mut fields = FieldMap::new();
        fields.insert(self.config.score_field.clone(), Value::Number(score.clone()));
        fields.insert(self.config.count_field.clone(), json!(count));
        self.store
            .commit(WriteBatch::single_merge(
                &self.config.users_collection,
                user_id,
                fields,
            ))
            .await?;

        debug!(user_id = %user_id, score = %score, events = count, "Recomputed reputation");
        Ok(ReputationScore {
            score,
            events: count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn event(id: &str, user: &str, points: Value) -> (String, Document) {
        (
            "reputationEvents".to_string(),
            Document::new(id, json!({"userId": user, "points": points, "type": "trade_completed"})),
        )
    }

    fn user(id: &str) -> (String, Document) {
        ("users".to_string(), Document::new(id, json!({"displayName": id})))
    }

    #[tokio::test]
    async fn test_recompute_sums_only_that_users_events() {
        let store = MemoryStore::with_documents([
            user("u1"),
            user("u2"),
            event("e1", "u1", json!(10)),
            event("e2", "u2", json!(7)),
            event("e3", "u1", json!(-3)),
        ]);
        let service = EventLogReputation::new(&store, ReputationConfig::default());

        let score = service.recompute_user_reputation("u1").await.unwrap();
        assert_eq!(score.score, Number::from(7));
        assert_eq!(score.events, 2);

        let stored = store.get("users", "u1").await.unwrap().unwrap();
        assert_eq!(stored.get("reputationScore"), Some(&json!(7)));
        assert_eq!(stored.get("reputationEventCount"), Some(&json!(2)));
        assert_eq!(stored.get("displayName"), Some(&json!("u1")));
    }

    #[tokio::test]
    async fn test_indexed_events_give_same_scores() {
        let store = MemoryStore::with_documents([
            user("u1"),
            user("u2"),
            event("e1", "u1", json!(4)),
            event("e2", "u2", json!(1.5)),
            event("e3", "u1", json!(6)),
        ]);
        let plain = EventLogReputation::new(&store, ReputationConfig::default());
        let mut indexed = EventLogReputation::new(&store, ReputationConfig::default());
        assert_eq!(indexed.index_events().await.unwrap(), 2);

        for id in ["u1", "u2"] {
            let a = plain.recompute_user_reputation(id).await.unwrap();
            let b = indexed.recompute_user_reputation(id).await.unwrap();
            assert_eq!(a, b);
        }
        let stored = store.get("users", "u1").await.unwrap().unwrap();
        assert_eq!(stored.get("reputationScore"), Some(&json!(10)));
    }

    #[tokio::test]
    async fn test_user_without_events_scores_zero() {
        let store = MemoryStore::with_documents([user("u1")]);
        let service = EventLogReputation::new(&store, ReputationConfig::default());
        let score = service.recompute_user_reputation("u1").await.unwrap();
        assert_eq!(score.score, Number::from(0));
        assert_eq!(score.events, 0);
    }

    #[tokio::test]
    async fn test_non_numeric_points_fail_without_writing() {
        let store = MemoryStore::with_documents([user("u1"), event("e1", "u1", json!("ten"))]);
        let service = EventLogReputation::new(&store, ReputationConfig::default());

        let err = service.recompute_user_reputation("u1").await.unwrap_err();
        assert!(matches!(err, BackfillError::Transform(_)));
        let stored = store.get("users", "u1").await.unwrap().unwrap();
        assert!(!stored.has_field("reputationScore"));
    }

    #[tokio::test]
    async fn test_missing_user_is_an_error() {
        let store = MemoryStore::with_documents([event("e1", "ghost", json!(1))]);
        let service = EventLogReputation::new(&store, ReputationConfig::default());
        assert!(service.recompute_user_reputation("ghost").await.is_err());
    }

    #[test]
    fn test_fractional_points_sum_as_float() {
        let events = vec![
            Document::new("e1", json!({"points": 1})),
            Document::new("e2", json!({"points": 0.5})),
        ];
        let total = sum_points(&events, "points").unwrap();
        assert_eq!(total.as_f64(), Some(1.5));
        assert!(total.as_i64().is_none());
    }
}
