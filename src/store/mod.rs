//! Document store abstraction and backends.
//!
//! The ingest engine needs exactly four operations from its store: find one
//! document by a containment filter, insert one, insert a batch, and update
//! one in place. Everything above this module works against the [`Store`]
//! trait so the merge logic is identical over PostgreSQL and the in-memory
//! backend used for tests and dry runs.

mod memory;
mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

use async_trait::async_trait;
use serde_json::Value;

/// A stored document: the backend-assigned id plus the JSON body.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: i64,
    pub body: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An insert violated a natural-key uniqueness constraint. Callers treat
    /// this as "the document already exists" and re-read, not as fatal.
    #[error("unique key conflict on insert")]
    Conflict,
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

/// Minimal document-store contract.
///
/// Filters are JSON objects matched by containment (every filter field must
/// be present in the document with an equal value, recursively), mirroring
/// PostgreSQL's `@>` operator. `update_one` merges the given fields into the
/// first matching document's top level and leaves everything else untouched.
#[async_trait]
pub trait Store: Send + Sync {
    async fn find_one(&self, collection: &str, filter: &Value)
    -> Result<Option<Document>, StoreError>;

    async fn insert_one(&self, collection: &str, doc: Value) -> Result<i64, StoreError>;

    /// Insert a batch of documents in one statement. All-or-nothing: a
    /// failure inserts none of the batch.
    async fn insert_many(&self, collection: &str, docs: Vec<Value>) -> Result<u64, StoreError>;

    /// Merge `set` into the first document matching `filter`. Returns whether
    /// a document was updated.
    async fn update_one(
        &self,
        collection: &str,
        filter: &Value,
        set: &Value,
    ) -> Result<bool, StoreError>;
}
