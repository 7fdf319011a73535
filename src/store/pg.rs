//! PostgreSQL-backed document store.
//!
//! Documents live in a single `documents` table as JSONB rows keyed by
//! collection name. Filters use the `@>` containment operator, which the GIN
//! index on `body` serves; natural-key uniqueness is enforced by partial
//! unique indexes per collection (see `migrations/`).

use super::{Document, Store, StoreError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::info;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the database and run pending migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(4))
            .connect(database_url)
            .await
            .context("failed to create database pool")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;

        info!(max_connections = 4, "database pool established");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn map_db_err(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e
        && db.is_unique_violation()
    {
        return StoreError::Conflict;
    }
    StoreError::Database(e)
}

#[async_trait]
impl Store for PgStore {
    async fn find_one(
        &self,
        collection: &str,
        filter: &Value,
    ) -> Result<Option<Document>, StoreError> {
        let row: Option<(i64, Value)> = sqlx::query_as(
            r#"
            SELECT id, body FROM documents
            WHERE collection = $1 AND body @> $2
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(collection)
        .bind(filter)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?;

        Ok(row.map(|(id, body)| Document { id, body }))
    }

    async fn insert_one(&self, collection: &str, doc: Value) -> Result<i64, StoreError> {
        let id: i64 =
            sqlx::query_scalar("INSERT INTO documents (collection, body) VALUES ($1, $2) RETURNING id")
                .bind(collection)
                .bind(doc)
                .fetch_one(&self.pool)
                .await
                .map_err(map_db_err)?;
        Ok(id)
    }

    async fn insert_many(&self, collection: &str, docs: Vec<Value>) -> Result<u64, StoreError> {
        if docs.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            INSERT INTO documents (collection, body)
            SELECT $1, v.body FROM UNNEST($2::jsonb[]) AS v(body)
            "#,
        )
        .bind(collection)
        .bind(docs)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;

        Ok(result.rows_affected())
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Value,
        set: &Value,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET body = body || $3, updated_at = now()
            WHERE id = (
                SELECT id FROM documents
                WHERE collection = $1 AND body @> $2
                ORDER BY id
                LIMIT 1
            )
            "#,
        )
        .bind(collection)
        .bind(filter)
        .bind(set)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;

        Ok(result.rows_affected() > 0)
    }
}
