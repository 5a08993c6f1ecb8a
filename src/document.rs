//! Document snapshots and field-map helpers
//!
//! A document is an identifier plus whatever JSON value the store holds for
//! it. Well-formed documents hold an object; anything else is treated as
//! having no fields at all.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field map of a well-formed document
pub type FieldMap = serde_json::Map<String, Value>;

/// Point-in-time snapshot of one stored document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document identifier, unique within its collection
    pub id: String,
    /// Stored field value (normally a JSON object)
    pub fields: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Value) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Field map, or `None` when the stored value is not an object
    pub fn as_object(&self) -> Option<&FieldMap> {
        self.fields.as_object()
    }

    /// Whether the field exists, with any value including `null`.
    ///
    /// Malformed documents never have a field.
    pub fn has_field(&self, name: &str) -> bool {
        self.as_object().is_some_and(|map| map.contains_key(name))
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.as_object().and_then(|map| map.get(name))
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Merge `patch` into this document's fields
    pub fn merge(&mut self, patch: &FieldMap) {
        merge_fields(&mut self.fields, patch);
    }
}

/// Merge `patch` into `target`, replacing a non-object target with an empty
/// object first. Keys in `patch` overwrite existing keys.
pub fn merge_fields(target: &mut Value, patch: &FieldMap) {
    if !target.is_object() {
        *target = Value::Object(FieldMap::new());
    }
    if let Value::Object(map) = target {
        for (key, value) in patch {
            map.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_has_field_includes_null() {
        let doc = Document::new("t1", json!({"visibility": null}));
        assert!(doc.has_field("visibility"));
        assert!(!doc.has_field("status"));
    }

    #[test]
    fn test_malformed_document_has_no_fields() {
        let doc = Document::new("t1", json!(["visibility"]));
        assert!(doc.as_object().is_none());
        assert!(!doc.has_field("visibility"));
        assert_eq!(doc.str_field("visibility"), None);
    }

    #[test]
    fn test_merge_overwrites_and_keeps_other_keys() {
        let mut doc = Document::new("c1", json!({"title": "Mural", "public": false}));
        let patch = json!({"public": true, "visibility": "public"});
        doc.merge(patch.as_object().unwrap());

        assert_eq!(
            doc.fields,
            json!({"title": "Mural", "public": true, "visibility": "public"})
        );
    }

    #[test]
    fn test_merge_replaces_malformed_value() {
        let mut value = json!("legacy");
        let patch = json!({"visibility": "public"});
        merge_fields(&mut value, patch.as_object().unwrap());
        assert_eq!(value, json!({"visibility": "public"}));
    }
}
