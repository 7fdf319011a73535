//! Generic ingest engine: identity resolution and idempotent merge.
//!
//! The engine owns the control flow that every source would otherwise
//! reimplement. A source contributes only its field mappings: an
//! [`EntityKind`] per deduplicated entity collection and a [`FactKind`] per
//! observation collection.

pub mod merge;
pub mod normalize;
pub mod resolver;

pub use merge::{MergeEngine, MergeReport};
pub use normalize::NormalizeError;
pub use resolver::EntityResolver;

use serde_json::{Map, Value};

/// Field mapping for a deduplicated entity collection.
///
/// `key_fields` form the natural key: two documents with equal values for
/// all of them are the same entity. `refreshable_fields` are the only fields
/// that may change on a stored entity after creation.
#[derive(Debug, Clone, Copy)]
pub struct EntityKind {
    pub collection: &'static str,
    pub key_fields: &'static [&'static str],
    pub refreshable_fields: &'static [&'static str],
}

/// Field mapping for a fact (observation) collection.
///
/// `key_fields` form the composite natural key identifying one retained fact;
/// `mutable_fields` are replaced in place when a newer observation arrives
/// for the same key.
#[derive(Debug, Clone, Copy)]
pub struct FactKind {
    pub collection: &'static str,
    pub key_fields: &'static [&'static str],
    pub mutable_fields: &'static [&'static str],
}

/// Build the lookup filter for a document from its key fields.
///
/// Returns the name of the first missing field on failure. A JSON `null` is
/// a usable key value (the unknown-timestamp sentinel participates in
/// composite keys); only an absent field is an error.
pub(crate) fn key_filter(
    key_fields: &[&'static str],
    doc: &Value,
) -> Result<Value, &'static str> {
    let mut filter = Map::new();
    for &field in key_fields {
        match doc.get(field) {
            Some(v) => {
                filter.insert(field.to_owned(), v.clone());
            }
            None => return Err(field),
        }
    }
    Ok(Value::Object(filter))
}

/// Project a document onto a set of allowed fields, for update payloads.
pub(crate) fn field_subset(fields: &[&'static str], doc: &Value) -> Value {
    let mut subset = Map::new();
    for &field in fields {
        if let Some(v) = doc.get(field) {
            subset.insert(field.to_owned(), v.clone());
        }
    }
    Value::Object(subset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_filter_extracts_key_fields_only() {
        let doc = json!({"name": "Garakuta", "artist": "t+pazolite", "deluxe": 1, "bpm": 234});
        let filter = key_filter(&["name", "artist", "deluxe"], &doc).unwrap();
        assert_eq!(
            filter,
            json!({"name": "Garakuta", "artist": "t+pazolite", "deluxe": 1})
        );
    }

    #[test]
    fn key_filter_reports_missing_field() {
        let doc = json!({"name": "Garakuta"});
        assert_eq!(key_filter(&["name", "artist"], &doc), Err("artist"));
    }

    #[test]
    fn key_filter_accepts_null_values() {
        let doc = json!({"song_id": 3, "played_at": null});
        let filter = key_filter(&["song_id", "played_at"], &doc).unwrap();
        assert_eq!(filter, json!({"song_id": 3, "played_at": null}));
    }
}
