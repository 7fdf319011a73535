//! In-memory document store for tests and `--dry-run`.
//!
//! Matches the PostgreSQL backend's semantics: containment filters, shallow
//! top-level merge on update, and optional unique indexes that surface
//! [`StoreError::Conflict`] on duplicate inserts.

use super::{Document, Store, StoreError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    next_id: i64,
    collections: HashMap<String, Vec<Document>>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    unique_indexes: Vec<(String, Vec<String>)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enforce uniqueness over `fields` for documents in `collection`,
    /// mirroring the partial unique indexes of the PostgreSQL schema.
    pub fn with_unique_index(mut self, collection: &str, fields: &[&str]) -> Self {
        self.unique_indexes.push((
            collection.to_owned(),
            fields.iter().map(|f| (*f).to_owned()).collect(),
        ));
        self
    }

    /// Number of documents currently stored in `collection`.
    pub fn count(&self, collection: &str) -> usize {
        let inner = self.inner.lock().expect("store lock poisoned");
        inner.collections.get(collection).map_or(0, Vec::len)
    }

    fn would_conflict(&self, inner: &Inner, collection: &str, doc: &Value) -> bool {
        for (indexed, fields) in &self.unique_indexes {
            if indexed != collection {
                continue;
            }
            let Some(docs) = inner.collections.get(collection) else {
                continue;
            };
            let key_matches = |existing: &Document| {
                fields
                    .iter()
                    .all(|f| match (existing.body.get(f), doc.get(f)) {
                        (Some(a), Some(b)) => contains(a, b),
                        (None, None) => true,
                        _ => false,
                    })
            };
            if docs.iter().any(key_matches) {
                return true;
            }
        }
        false
    }
}

/// JSONB-style containment: every field of `filter` must be present in
/// `body` with a matching value. Numbers compare numerically so `1` and
/// `1.0` are equal, as they are under `@>`.
fn contains(body: &Value, filter: &Value) -> bool {
    match (body, filter) {
        (Value::Object(b), Value::Object(f)) => f
            .iter()
            .all(|(k, fv)| b.get(k).is_some_and(|bv| contains(bv, fv))),
        (Value::Array(b), Value::Array(f)) => {
            f.iter().all(|fv| b.iter().any(|bv| contains(bv, fv)))
        }
        (Value::Number(b), Value::Number(f)) => b.as_f64() == f.as_f64(),
        _ => body == filter,
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_one(
        &self,
        collection: &str,
        filter: &Value,
    ) -> Result<Option<Document>, StoreError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner
            .collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| contains(&d.body, filter)))
            .cloned())
    }

    async fn insert_one(&self, collection: &str, doc: Value) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        if self.would_conflict(&inner, collection, &doc) {
            return Err(StoreError::Conflict);
        }
        inner.next_id += 1;
        let id = inner.next_id;
        inner
            .collections
            .entry(collection.to_owned())
            .or_default()
            .push(Document { id, body: doc });
        Ok(id)
    }

    async fn insert_many(&self, collection: &str, docs: Vec<Value>) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        // All-or-nothing, like the single-statement batch insert in Postgres.
        for doc in &docs {
            if self.would_conflict(&inner, collection, doc) {
                return Err(StoreError::Conflict);
            }
        }
        let count = docs.len() as u64;
        for doc in docs {
            inner.next_id += 1;
            let id = inner.next_id;
            inner
                .collections
                .entry(collection.to_owned())
                .or_default()
                .push(Document { id, body: doc });
        }
        Ok(count)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Value,
        set: &Value,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let Some(docs) = inner.collections.get_mut(collection) else {
            return Ok(false);
        };
        let Some(doc) = docs.iter_mut().find(|d| contains(&d.body, filter)) else {
            return Ok(false);
        };
        if let (Value::Object(body), Value::Object(fields)) = (&mut doc.body, set) {
            for (k, v) in fields {
                body.insert(k.clone(), v.clone());
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn find_one_matches_by_containment() {
        let store = MemoryStore::new();
        store
            .insert_one("songs", json!({"name": "Oshama Scramble!", "artist": "t+pazolite", "deluxe": 1}))
            .await
            .unwrap();

        let found = store
            .find_one("songs", &json!({"name": "Oshama Scramble!", "deluxe": 1}))
            .await
            .unwrap();
        assert!(found.is_some());

        let missing = store
            .find_one("songs", &json!({"name": "Oshama Scramble!", "deluxe": 0}))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn numbers_compare_numerically() {
        let store = MemoryStore::new();
        store
            .insert_one("scores", json!({"map_id": 5, "accuracy": 0.5}))
            .await
            .unwrap();
        let found = store
            .find_one("scores", &json!({"map_id": 5.0}))
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn update_one_merges_top_level_fields() {
        let store = MemoryStore::new();
        store
            .insert_one("maps", json!({"map_id": 9, "self_play_count": 0, "bpm": 180.0}))
            .await
            .unwrap();

        let updated = store
            .update_one("maps", &json!({"map_id": 9}), &json!({"self_play_count": 42}))
            .await
            .unwrap();
        assert!(updated);

        let doc = store
            .find_one("maps", &json!({"map_id": 9}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.body["self_play_count"], 42);
        assert_eq!(doc.body["bpm"], 180.0);
    }

    #[tokio::test]
    async fn unique_index_rejects_duplicate_keys() {
        let store = MemoryStore::new().with_unique_index("songs", &["name", "artist", "deluxe"]);
        store
            .insert_one("songs", json!({"name": "A", "artist": "B", "deluxe": 0}))
            .await
            .unwrap();

        let err = store
            .insert_one("songs", json!({"name": "A", "artist": "B", "deluxe": 0, "bpm": 200}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict));

        // Different key value is fine.
        store
            .insert_one("songs", json!({"name": "A", "artist": "B", "deluxe": 1}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn insert_many_is_all_or_nothing() {
        let store = MemoryStore::new().with_unique_index("songs", &["name"]);
        store
            .insert_one("songs", json!({"name": "existing"}))
            .await
            .unwrap();

        let err = store
            .insert_many(
                "songs",
                vec![json!({"name": "fresh"}), json!({"name": "existing"})],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
        assert_eq!(store.count("songs"), 1);
    }
}
