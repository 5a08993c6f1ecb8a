//! Per-document transforms
//!
//! A [`Transform`] looks at one document snapshot and decides whether a write
//! is needed. The generic [`FieldBackfill`] applies, in order:
//!
//! 1. the optional filter (documents outside scope are [`Decision::Filtered`]),
//! 2. the presence check on the target field ([`Decision::AlreadyPresent`]),
//! 3. the fixed default field map ([`Decision::Update`]).
//!
//! Because the presence check runs before any default is applied, an
//! existing value is never overwritten and re-running a backfill is a no-op.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{Document, FieldMap};
use crate::error::{BackfillError, TransformError};

/// Outcome of deciding one document
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Merge these fields into the document
    Update(FieldMap),
    /// Target field already present, nothing to do
    AlreadyPresent,
    /// Document is outside the transform's scope
    Filtered,
}

/// Decides the write for a single document
pub trait Transform: Send + Sync {
    fn decide(&self, doc: &Document) -> Result<Decision, TransformError>;
}

/// Pure predicate selecting which documents a backfill applies to
pub trait DocumentFilter: Send + Sync {
    fn matches(&self, doc: &Document) -> bool;
}

impl<F> DocumentFilter for F
where
    F: Fn(&Document) -> bool + Send + Sync,
{
    fn matches(&self, doc: &Document) -> bool {
        self(doc)
    }
}

/// Configuration form of a filter: `field ∈ any_of`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    pub any_of: Vec<Value>,
}

impl FieldFilter {
    pub fn new(field: &str, any_of: Vec<Value>) -> Self {
        Self {
            field: field.to_string(),
            any_of,
        }
    }
}

impl DocumentFilter for FieldFilter {
    fn matches(&self, doc: &Document) -> bool {
        doc.get(&self.field)
            .is_some_and(|value| self.any_of.contains(value))
    }
}

/// Add a missing field with a fixed default
pub struct FieldBackfill {
    target_field: String,
    defaults: FieldMap,
    filter: Option<Box<dyn DocumentFilter>>,
}

impl std::fmt::Debug for FieldBackfill {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldBackfill")
            .field("target_field", &self.target_field)
            .field("defaults", &self.defaults)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

impl FieldBackfill {
    /// `defaults` must be non-empty and must set `target_field`
    pub fn new(target_field: &str, defaults: FieldMap) -> Result<Self, BackfillError> {
        if defaults.is_empty() {
            return Err(BackfillError::Config(format!(
                "backfill of '{}' has no default fields",
                target_field
            )));
        }
        if !defaults.contains_key(target_field) {
            return Err(BackfillError::Config(format!(
                "defaults for '{}' do not set the target field",
                target_field
            )));
        }
        Ok(Self {
            target_field: target_field.to_string(),
            defaults,
            filter: None,
        })
    }

    pub fn with_filter(mut self, filter: impl DocumentFilter + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Remove the filter so every document is in scope
    pub fn without_filter(mut self) -> Self {
        self.filter = None;
        self
    }

    pub fn target_field(&self) -> &str {
        &self.target_field
    }

    pub fn defaults(&self) -> &FieldMap {
        &self.defaults
    }

    pub fn is_filtered(&self) -> bool {
        self.filter.is_some()
    }
}

impl Transform for FieldBackfill {
    fn decide(&self, doc: &Document) -> Result<Decision, TransformError> {
        if let Some(filter) = &self.filter {
            if !filter.matches(doc) {
                return Ok(Decision::Filtered);
            }
        }
        if doc.has_field(&self.target_field) {
            return Ok(Decision::AlreadyPresent);
        }
        Ok(Decision::Update(self.defaults.clone()))
    }
}
