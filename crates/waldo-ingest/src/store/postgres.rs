//! Postgres record store
//!
//! One connection is opened per run; migrations are applied on connect.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::time::Duration;
use tracing::{debug, info};
use waldo_common::{Attributes, MetadataRecord};

use super::RecordStore;
use crate::error::StoreError;

/// [`RecordStore`] over the `asset_metadata` table
#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    /// Connect to `url` and bring the schema up to date.
    ///
    /// Refused connections are retried until `timeout` elapses.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .acquire_timeout(timeout)
            .connect(url)
            .await
            .map_err(|e| match e {
                sqlx::Error::PoolTimedOut => StoreError::ConnectTimeout(timeout),
                other => StoreError::Database(other),
            })?;
        info!("Record store connection opened");

        Self::from_pool(pool).await
    }

    /// Use an existing pool; migrations are still applied.
    pub async fn from_pool(pool: PgPool) -> Result<Self, StoreError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        debug!("Record store migrations applied");
        Ok(Self { pool })
    }

    fn pool(&self) -> Result<&PgPool, StoreError> {
        if self.pool.is_closed() {
            return Err(StoreError::Closed);
        }
        Ok(&self.pool)
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn upsert(&self, record: &MetadataRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO asset_metadata (source_key, attributes)
            VALUES ($1, $2)
            ON CONFLICT (source_key) DO UPDATE
            SET attributes = EXCLUDED.attributes,
                updated_at = NOW()
            "#,
        )
        .bind(record.source_key())
        .bind(Json(record.attributes()))
        .execute(self.pool()?)
        .await?;

        debug!(source_key = record.source_key(), "Upserted record");
        Ok(())
    }

    async fn find_by_key(&self, source_key: &str) -> Result<Option<MetadataRecord>, StoreError> {
        let row: Option<(Json<Attributes>,)> =
            sqlx::query_as("SELECT attributes FROM asset_metadata WHERE source_key = $1")
                .bind(source_key)
                .fetch_optional(self.pool()?)
                .await?;

        Ok(row.map(|(Json(attributes),)| MetadataRecord::from_parts(source_key, attributes)))
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("Record store connection closed");
    }
}
