//! Per-fact upsert policy with batched insertion of new facts.

use super::{FactKind, field_subset, key_filter};
use crate::store::{Store, StoreError};
use indexmap::IndexMap;
use serde_json::Value;
use std::ops::AddAssign;
use tracing::{debug, warn};

/// Counts from one merge pass, for the run summary.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
    /// Facts inserted as new records.
    pub inserted: u64,
    /// Facts whose stored counterpart had its mutable fields replaced.
    pub updated: u64,
    /// Facts dropped: missing key fields, or a store failure on that record.
    pub skipped: u64,
    /// Facts superseded by a later observation with the same key within the
    /// same batch (newest wins).
    pub deduplicated: u64,
}

impl AddAssign for MergeReport {
    fn add_assign(&mut self, rhs: Self) {
        self.inserted += rhs.inserted;
        self.updated += rhs.updated;
        self.skipped += rhs.skipped;
        self.deduplicated += rhs.deduplicated;
    }
}

/// Applies the insert-or-update policy for one fact collection.
pub struct MergeEngine<'a> {
    store: &'a dyn Store,
}

impl<'a> MergeEngine<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    /// Merge a sequence of fact documents.
    ///
    /// Facts whose composite key already exists in the store have only the
    /// kind's mutable fields replaced; the rest are queued and inserted in
    /// one batch at the end. The queued and updated sets are disjoint: a
    /// second in-batch observation for the same key replaces the queued one
    /// instead of double-inserting.
    ///
    /// Per-record store failures skip that record and continue. The final
    /// batched insert is all-or-nothing; its failure is the only error this
    /// method propagates.
    pub async fn merge(
        &self,
        kind: &FactKind,
        facts: Vec<Value>,
    ) -> Result<MergeReport, StoreError> {
        let mut report = MergeReport::default();
        let mut pending: IndexMap<String, Value> = IndexMap::new();

        for fact in facts {
            let filter = match key_filter(kind.key_fields, &fact) {
                Ok(f) => f,
                Err(field) => {
                    warn!(
                        collection = kind.collection,
                        field, "fact is missing a composite-key field, skipping"
                    );
                    report.skipped += 1;
                    continue;
                }
            };
            let fingerprint = filter.to_string();

            if pending.contains_key(&fingerprint) {
                pending.insert(fingerprint, fact);
                report.deduplicated += 1;
                continue;
            }

            match self.store.find_one(kind.collection, &filter).await {
                Ok(Some(_)) => {
                    let set = field_subset(kind.mutable_fields, &fact);
                    match self.store.update_one(kind.collection, &filter, &set).await {
                        Ok(true) => report.updated += 1,
                        Ok(false) => {
                            warn!(
                                collection = kind.collection,
                                "fact vanished between lookup and update, skipping"
                            );
                            report.skipped += 1;
                        }
                        Err(e) => {
                            warn!(
                                collection = kind.collection,
                                error = ?e,
                                "failed to update fact, skipping"
                            );
                            report.skipped += 1;
                        }
                    }
                }
                Ok(None) => {
                    pending.insert(fingerprint, fact);
                }
                Err(e) => {
                    warn!(
                        collection = kind.collection,
                        error = ?e,
                        "fact lookup failed, skipping"
                    );
                    report.skipped += 1;
                }
            }
        }

        if !pending.is_empty() {
            let docs: Vec<Value> = pending.into_values().collect();
            report.inserted = self.store.insert_many(kind.collection, docs).await?;
        }

        debug!(
            collection = kind.collection,
            inserted = report.inserted,
            updated = report.updated,
            skipped = report.skipped,
            deduplicated = report.deduplicated,
            "merge pass complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    const RECORDS: FactKind = FactKind {
        collection: "dx_records",
        key_fields: &["song_id", "difficulty"],
        mutable_fields: &["achievement", "deluxe_score", "combo_status", "rating"],
    };

    fn record(song_id: i64, difficulty: i64, achievement: f64) -> Value {
        json!({
            "song_id": song_id,
            "difficulty": difficulty,
            "achievement": achievement,
            "deluxe_score": 1000,
            "combo_status": 0,
            "rating": 200,
        })
    }

    #[tokio::test]
    async fn new_facts_are_batch_inserted() {
        let store = MemoryStore::new();
        let report = MergeEngine::new(&store)
            .merge(&RECORDS, vec![record(1, 3, 99.5), record(1, 4, 97.0)])
            .await
            .unwrap();

        assert_eq!(report.inserted, 2);
        assert_eq!(report.updated, 0);
        assert_eq!(store.count("dx_records"), 2);
    }

    #[tokio::test]
    async fn existing_key_updates_mutable_fields_in_place() {
        let store = MemoryStore::new();
        let engine = MergeEngine::new(&store);
        engine
            .merge(&RECORDS, vec![record(1, 3, 98.0)])
            .await
            .unwrap();

        let report = engine
            .merge(&RECORDS, vec![record(1, 3, 100.5)])
            .await
            .unwrap();

        assert_eq!(report.inserted, 0);
        assert_eq!(report.updated, 1);
        assert_eq!(store.count("dx_records"), 1);

        let doc = store
            .find_one("dx_records", &json!({"song_id": 1, "difficulty": 3}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.body["achievement"], 100.5);
    }

    #[tokio::test]
    async fn update_leaves_immutable_fields_untouched() {
        let store = MemoryStore::new();
        let engine = MergeEngine::new(&store);
        let mut first = record(2, 0, 90.0);
        first["track"] = json!(5);
        engine.merge(&RECORDS, vec![first]).await.unwrap();

        let mut second = record(2, 0, 95.0);
        second["track"] = json!(9);
        engine.merge(&RECORDS, vec![second]).await.unwrap();

        let doc = store
            .find_one("dx_records", &json!({"song_id": 2, "difficulty": 0}))
            .await
            .unwrap()
            .unwrap();
        // "track" is not in the mutable-field list, so the original survives.
        assert_eq!(doc.body["track"], 5);
        assert_eq!(doc.body["achievement"], 95.0);
    }

    #[tokio::test]
    async fn in_batch_duplicates_keep_newest() {
        let store = MemoryStore::new();
        let report = MergeEngine::new(&store)
            .merge(&RECORDS, vec![record(1, 3, 90.0), record(1, 3, 99.0)])
            .await
            .unwrap();

        assert_eq!(report.inserted, 1);
        assert_eq!(report.deduplicated, 1);
        let doc = store
            .find_one("dx_records", &json!({"song_id": 1, "difficulty": 3}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.body["achievement"], 99.0);
    }

    #[tokio::test]
    async fn missing_key_field_skips_only_that_record() {
        let store = MemoryStore::new();
        let mut bad = record(1, 3, 90.0);
        bad.as_object_mut().unwrap().remove("difficulty");

        let report = MergeEngine::new(&store)
            .merge(
                &RECORDS,
                vec![
                    record(1, 0, 90.0),
                    record(1, 1, 91.0),
                    bad,
                    record(1, 2, 92.0),
                    record(1, 4, 93.0),
                ],
            )
            .await
            .unwrap();

        assert_eq!(report.inserted, 4);
        assert_eq!(report.skipped, 1);
        assert_eq!(store.count("dx_records"), 4);
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let store = MemoryStore::new();
        let report = MergeEngine::new(&store)
            .merge(&RECORDS, Vec::new())
            .await
            .unwrap();
        assert_eq!(report, MergeReport::default());
        assert_eq!(store.count("dx_records"), 0);
    }

    #[tokio::test]
    async fn rerun_of_identical_batch_reports_zero_inserts() {
        let store = MemoryStore::new();
        let engine = MergeEngine::new(&store);
        let batch = vec![record(1, 3, 99.5), record(2, 3, 98.0)];

        let first = engine.merge(&RECORDS, batch.clone()).await.unwrap();
        assert_eq!(first.inserted, 2);

        let second = engine.merge(&RECORDS, batch).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, 2);
        assert_eq!(store.count("dx_records"), 2);
    }
}
