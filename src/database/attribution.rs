//! Postgres attribution rebinder
//!
//! Offerings reference the node that contributed them. Promotion retires the
//! contributor node, so its records move to the replacement.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use super::store_error;
use crate::hierarchy::NodeId;
use crate::store::{AttributionRebinder, StoreResult};

#[derive(Debug, Clone)]
pub struct PgAttributionRebinder {
    pool: PgPool,
}

impl PgAttributionRebinder {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn initialize_schema(&self) -> anyhow::Result<()> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS offering_records (
                record_id UUID PRIMARY KEY,
                contributor_id UUID NOT NULL,
                memo TEXT NOT NULL DEFAULT '',
                recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );

            CREATE INDEX IF NOT EXISTS idx_offering_records_contributor
            ON offering_records(contributor_id);
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record an offering against `contributor`.
    pub async fn record(&self, contributor: NodeId, memo: &str) -> StoreResult<Uuid> {
        let record_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO offering_records (record_id, contributor_id, memo) VALUES ($1, $2, $3)",
        )
        .bind(record_id)
        .bind(contributor.as_uuid())
        .bind(memo)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(record_id)
    }

    pub async fn count_for(&self, contributor: NodeId) -> StoreResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM offering_records WHERE contributor_id = $1")
            .bind(contributor.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(store_error)
    }
}

#[async_trait]
impl AttributionRebinder for PgAttributionRebinder {
    async fn rebind_contributor(&self, old: NodeId, new: NodeId) -> StoreResult<u64> {
        let result =
            sqlx::query("UPDATE offering_records SET contributor_id = $2 WHERE contributor_id = $1")
                .bind(old.as_uuid())
                .bind(new.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(store_error)?;

        let updated = result.rows_affected();
        info!("Rebound {} offering record(s) from {} to {}", updated, old, new);
        Ok(updated)
    }
}
