//! Backfill job definitions
//!
//! A job names one collection, the field it guarantees, the defaults used
//! when that field is missing, and an optional status-style filter. Jobs are
//! configured in TOML; the two built-in jobs cover the legacy TradeYa
//! records that predate the visibility flags.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;

use crate::document::FieldMap;
use crate::error::BackfillError;
use crate::transform::{FieldBackfill, FieldFilter, Transform};

pub const TRADES_VISIBILITY: &str = "trades-visibility";
pub const COLLABORATIONS_VISIBILITY: &str = "collaborations-visibility";

/// Serializable description of a backfill job
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JobSpec {
    /// Unique job name, also the checkpoint key
    pub name: String,
    pub collection: String,
    /// Field whose presence marks a document as already migrated
    pub target_field: String,
    /// Fields merged into documents missing `target_field`
    pub defaults: FieldMap,
    /// Restrict the job to documents matching this filter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FieldFilter>,
}

/// A job ready to run
pub struct BackfillJob {
    pub name: String,
    pub collection: String,
    pub transform: Box<dyn Transform>,
}

impl BackfillJob {
    pub fn new(name: &str, collection: &str, transform: impl Transform + 'static) -> Self {
        Self {
            name: name.to_string(),
            collection: collection.to_string(),
            transform: Box::new(transform),
        }
    }
}

impl JobSpec {
    pub fn build(&self) -> Result<BackfillJob, BackfillError> {
        Ok(BackfillJob::new(&self.name, &self.collection, self.field_backfill()?))
    }

    /// Build with the filter dropped, so every document in the collection is in scope
    pub fn build_unfiltered(&self) -> Result<BackfillJob, BackfillError> {
        Ok(BackfillJob::new(
            &self.name,
            &self.collection,
            self.field_backfill()?.without_filter(),
        ))
    }

    fn field_backfill(&self) -> Result<FieldBackfill, BackfillError> {
        let backfill = FieldBackfill::new(&self.target_field, self.defaults.clone())?;
        Ok(match &self.filter {
            Some(filter) => backfill.with_filter(filter.clone()),
            None => backfill,
        })
    }
}

fn field_map(value: serde_json::Value) -> FieldMap {
    match value {
        serde_json::Value::Object(map) => map,
        _ => FieldMap::new(),
    }
}

/// Jobs shipped with the tool
pub fn builtin_jobs() -> Vec<JobSpec> {
    vec![
        JobSpec {
            name: TRADES_VISIBILITY.to_string(),
            collection: "trades".to_string(),
            target_field: "visibility".to_string(),
            defaults: field_map(json!({"visibility": "public"})),
            // Completed and cancelled trades are left alone unless the
            // operator runs with --all-statuses.
            filter: Some(FieldFilter::new("status", vec![json!("active"), json!("open")])),
        },
        JobSpec {
            name: COLLABORATIONS_VISIBILITY.to_string(),
            collection: "collaborations".to_string(),
            target_field: "visibility".to_string(),
            defaults: field_map(json!({"visibility": "public", "public": true})),
            filter: None,
        },
    ]
}

/// Check names are unique and every job can be built
pub fn validate_jobs(specs: &[JobSpec]) -> Result<(), BackfillError> {
    let mut seen = HashSet::new();
    for spec in specs {
        if !seen.insert(spec.name.as_str()) {
            return Err(BackfillError::Config(format!("duplicate job name '{}'", spec.name)));
        }
        if spec.collection.is_empty() || spec.collection.contains(':') {
            return Err(BackfillError::Config(format!(
                "job '{}' has invalid collection '{}'",
                spec.name, spec.collection
            )));
        }
        spec.field_backfill()?;
    }
    Ok(())
}

/// Pick jobs by name, keeping configuration order; no names selects all
pub fn select_jobs<'a>(specs: &'a [JobSpec], names: &[String]) -> Result<Vec<&'a JobSpec>, BackfillError> {
    if names.is_empty() {
        return Ok(specs.iter().collect());
    }
    for name in names {
        if !specs.iter().any(|spec| &spec.name == name) {
            return Err(BackfillError::Config(format!("unknown job '{}'", name)));
        }
    }
    Ok(specs.iter().filter(|spec| names.contains(&spec.name)).collect())
}
