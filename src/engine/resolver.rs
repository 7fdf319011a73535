//! Natural-key find-or-create for entities.

use super::{EntityKind, field_subset, key_filter};
use crate::store::{Store, StoreError};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("entity is missing natural-key field `{0}`")]
    MissingKeyField(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Resolves entities to stable store references, creating them on first
/// observation.
///
/// Repeated calls with an equal natural key always return the same
/// reference, within a run (via the memo cache) and across runs (via the
/// store lookup). The lookup-then-create sequence is not atomic; if the
/// store reports a uniqueness conflict on create, another writer won the
/// race and the existing row is re-read and returned.
pub struct EntityResolver<'a> {
    store: &'a dyn Store,
    cache: HashMap<(&'static str, String), i64>,
    created: u64,
}

impl<'a> EntityResolver<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self {
            store,
            cache: HashMap::new(),
            created: 0,
        }
    }

    /// Entities created (not merely found) by this resolver so far.
    pub fn created(&self) -> u64 {
        self.created
    }

    pub async fn resolve_or_create(
        &mut self,
        kind: &EntityKind,
        doc: Value,
    ) -> Result<i64, ResolveError> {
        let filter =
            key_filter(kind.key_fields, &doc).map_err(ResolveError::MissingKeyField)?;
        let cache_key = (kind.collection, filter.to_string());

        if let Some(&id) = self.cache.get(&cache_key) {
            return Ok(id);
        }

        if let Some(existing) = self.store.find_one(kind.collection, &filter).await? {
            self.cache.insert(cache_key, existing.id);
            return Ok(existing.id);
        }

        let id = match self.store.insert_one(kind.collection, doc).await {
            Ok(id) => {
                self.created += 1;
                debug!(collection = kind.collection, id, "created entity");
                id
            }
            Err(StoreError::Conflict) => {
                // Lost a find-or-create race; the winning row is authoritative.
                self.store
                    .find_one(kind.collection, &filter)
                    .await?
                    .map(|d| d.id)
                    .ok_or(ResolveError::Store(StoreError::Conflict))?
            }
            Err(e) => return Err(e.into()),
        };

        self.cache.insert(cache_key, id);
        Ok(id)
    }

    /// Update the kind's refreshable fields on an existing entity. Fields in
    /// `set` outside the refreshable list are ignored. Returns whether a
    /// stored entity was updated.
    pub async fn refresh(
        &self,
        kind: &EntityKind,
        filter: &Value,
        set: &Value,
    ) -> Result<bool, StoreError> {
        let allowed = field_subset(kind.refreshable_fields, set);
        if allowed.as_object().is_some_and(|m| m.is_empty()) {
            return Ok(false);
        }
        self.store.update_one(kind.collection, filter, &allowed).await
    }
}
