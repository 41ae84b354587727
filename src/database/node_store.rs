//! Postgres-backed entity store
//!
//! One row per node in `hierarchy_nodes`, one nullable uuid column per
//! ancestor slot. Transactions run SERIALIZABLE so concurrent operations on
//! overlapping subtrees abort instead of interleaving; partial unique indexes
//! back the one-active-Zone and one-active-FamilyGroup rules.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use super::store_error;
use crate::error::StoreError;
use crate::hierarchy::{AncestorRefs, Inactivation, Node, NodeId, NodeStatus, Tier};
use crate::store::{EntityStore, StoreResult, StoreTransaction};

const NODE_COLUMNS: &str = "id, tier, status, church_id, pastor_id, copastor_id, supervisor_id, \
     zone_id, preacher_id, family_group_id, payload, inactivation_reason, inactivated_at, \
     promoted_from, created_at, updated_at";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS hierarchy_nodes (
    id UUID PRIMARY KEY,
    tier TEXT NOT NULL,
    status TEXT NOT NULL,
    church_id UUID,
    pastor_id UUID,
    copastor_id UUID,
    supervisor_id UUID,
    zone_id UUID,
    preacher_id UUID,
    family_group_id UUID,
    payload JSONB NOT NULL DEFAULT '{}'::jsonb,
    inactivation_reason TEXT,
    inactivated_at TIMESTAMPTZ,
    promoted_from UUID,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_hierarchy_nodes_church ON hierarchy_nodes(church_id, id);
CREATE INDEX IF NOT EXISTS idx_hierarchy_nodes_pastor ON hierarchy_nodes(pastor_id, id);
CREATE INDEX IF NOT EXISTS idx_hierarchy_nodes_copastor ON hierarchy_nodes(copastor_id, id);
CREATE INDEX IF NOT EXISTS idx_hierarchy_nodes_supervisor ON hierarchy_nodes(supervisor_id, id);
CREATE INDEX IF NOT EXISTS idx_hierarchy_nodes_zone ON hierarchy_nodes(zone_id, id);
CREATE INDEX IF NOT EXISTS idx_hierarchy_nodes_preacher ON hierarchy_nodes(preacher_id, id);
CREATE INDEX IF NOT EXISTS idx_hierarchy_nodes_family_group ON hierarchy_nodes(family_group_id, id);

CREATE UNIQUE INDEX IF NOT EXISTS uq_hierarchy_nodes_active_zone
ON hierarchy_nodes(supervisor_id)
WHERE tier = 'zone' AND status = 'active' AND supervisor_id IS NOT NULL;

CREATE UNIQUE INDEX IF NOT EXISTS uq_hierarchy_nodes_active_family_group
ON hierarchy_nodes(preacher_id)
WHERE tier = 'family_group' AND status = 'active' AND preacher_id IS NOT NULL;
"#;

/// Column holding the ancestor slot for `tier`. Disciples lead nobody.
fn slot_column(tier: Tier) -> Option<&'static str> {
    match tier {
        Tier::Church => Some("church_id"),
        Tier::Pastor => Some("pastor_id"),
        Tier::Copastor => Some("copastor_id"),
        Tier::Supervisor => Some("supervisor_id"),
        Tier::Zone => Some("zone_id"),
        Tier::Preacher => Some("preacher_id"),
        Tier::FamilyGroup => Some("family_group_id"),
        Tier::Disciple => None,
    }
}

#[derive(Debug, Clone)]
pub struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the node table and its indexes if they don't exist.
    pub async fn initialize_schema(&self) -> anyhow::Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        info!("hierarchy_nodes schema ready");
        Ok(())
    }
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;
        Ok(Box::new(PgStoreTransaction { tx, writes: 0 }))
    }
}

struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
    writes: usize,
}

impl PgStoreTransaction {
    async fn active_rival(&mut self, node: &Node) -> StoreResult<Option<(NodeId, NodeId)>> {
        if !node.tier.is_unique_per_leader() || !node.is_active() {
            return Ok(None);
        }
        let (Some(leader), Some(column)) = (
            node.direct_leader(),
            node.leader_tier().and_then(slot_column),
        ) else {
            return Ok(None);
        };

        let query = format!(
            "SELECT id FROM hierarchy_nodes \
             WHERE tier = $1 AND status = 'active' AND {column} = $2 AND id <> $3 \
             LIMIT 1"
        );
        let existing: Option<Uuid> = sqlx::query_scalar(&query)
            .bind(node.tier.as_str())
            .bind(leader.as_uuid())
            .bind(node.id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(store_error)?;

        Ok(existing.map(|id| (leader, NodeId::from_uuid(id))))
    }
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn get(&mut self, id: NodeId) -> StoreResult<Option<Node>> {
        let query = format!("SELECT {NODE_COLUMNS} FROM hierarchy_nodes WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(store_error)?;

        row.as_ref().map(node_from_row).transpose()
    }

    async fn find_by_ancestor_slot(
        &mut self,
        tier: Tier,
        id: NodeId,
        after: Option<NodeId>,
        limit: usize,
    ) -> StoreResult<Vec<Node>> {
        let Some(column) = slot_column(tier) else {
            return Ok(Vec::new());
        };

        let query = format!(
            "SELECT {NODE_COLUMNS} FROM hierarchy_nodes \
             WHERE {column} = $1 AND ($2::uuid IS NULL OR id > $2) \
             ORDER BY id \
             LIMIT $3"
        );
        let rows = sqlx::query(&query)
            .bind(id.as_uuid())
            .bind(after.map(|after| after.as_uuid()))
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(store_error)?;

        rows.iter().map(node_from_row).collect()
    }

    async fn find_subordinates(
        &mut self,
        leader_tier: Tier,
        leader: NodeId,
        after: Option<NodeId>,
        limit: usize,
    ) -> StoreResult<Vec<Node>> {
        let (Some(column), Some(tier)) = (slot_column(leader_tier), leader_tier.child()) else {
            return Ok(Vec::new());
        };

        let query = format!(
            "SELECT {NODE_COLUMNS} FROM hierarchy_nodes \
             WHERE {column} = $1 AND tier = $2 AND ($3::uuid IS NULL OR id > $3) \
             ORDER BY id \
             LIMIT $4"
        );
        let rows = sqlx::query(&query)
            .bind(leader.as_uuid())
            .bind(tier.as_str())
            .bind(after.map(|after| after.as_uuid()))
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(store_error)?;

        rows.iter().map(node_from_row).collect()
    }

    async fn upsert(&mut self, node: &Node) -> StoreResult<()> {
        if let Some((leader, existing)) = self.active_rival(node).await? {
            return Err(StoreError::Conflict {
                leader,
                tier: node.tier,
                existing,
            });
        }

        let slot = |tier: Tier| node.ancestors.get(tier).map(|id| id.as_uuid());
        sqlx::query(
            r#"
            INSERT INTO hierarchy_nodes (
                id, tier, status, church_id, pastor_id, copastor_id, supervisor_id,
                zone_id, preacher_id, family_group_id, payload, inactivation_reason,
                inactivated_at, promoted_from, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (id) DO UPDATE SET
                tier = EXCLUDED.tier,
                status = EXCLUDED.status,
                church_id = EXCLUDED.church_id,
                pastor_id = EXCLUDED.pastor_id,
                copastor_id = EXCLUDED.copastor_id,
                supervisor_id = EXCLUDED.supervisor_id,
                zone_id = EXCLUDED.zone_id,
                preacher_id = EXCLUDED.preacher_id,
                family_group_id = EXCLUDED.family_group_id,
                payload = EXCLUDED.payload,
                inactivation_reason = EXCLUDED.inactivation_reason,
                inactivated_at = EXCLUDED.inactivated_at,
                promoted_from = EXCLUDED.promoted_from,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(node.id.as_uuid())
        .bind(node.tier.as_str())
        .bind(node.status.as_str())
        .bind(slot(Tier::Church))
        .bind(slot(Tier::Pastor))
        .bind(slot(Tier::Copastor))
        .bind(slot(Tier::Supervisor))
        .bind(slot(Tier::Zone))
        .bind(slot(Tier::Preacher))
        .bind(slot(Tier::FamilyGroup))
        .bind(&node.payload)
        .bind(node.inactivation.as_ref().map(|i| i.reason.as_str()))
        .bind(node.inactivation.as_ref().map(|i| i.at))
        .bind(node.promoted_from.map(|id| id.as_uuid()))
        .bind(node.created_at)
        .bind(node.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(store_error)?;

        self.writes += 1;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let PgStoreTransaction { tx, writes } = *self;
        debug!("Committing {} node write(s)", writes);
        tx.commit().await.map_err(store_error)
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        let PgStoreTransaction { tx, writes } = *self;
        debug!("Rolling back {} node write(s)", writes);
        tx.rollback().await.map_err(store_error)
    }
}

fn node_from_row(row: &PgRow) -> StoreResult<Node> {
    let slot = |column: &str| -> StoreResult<Option<NodeId>> {
        let id: Option<Uuid> = row.try_get(column).map_err(store_error)?;
        Ok(id.map(NodeId::from_uuid))
    };

    let tier: String = row.try_get("tier").map_err(store_error)?;
    let status: String = row.try_get("status").map_err(store_error)?;
    let reason: Option<String> = row.try_get("inactivation_reason").map_err(store_error)?;
    let inactivated_at: Option<DateTime<Utc>> =
        row.try_get("inactivated_at").map_err(store_error)?;
    let promoted_from: Option<Uuid> = row.try_get("promoted_from").map_err(store_error)?;

    Ok(Node {
        id: NodeId::from_uuid(row.try_get("id").map_err(store_error)?),
        tier: tier.parse().map_err(|e: String| StoreError::Backend(anyhow::anyhow!(e)))?,
        status: status
            .parse::<NodeStatus>()
            .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?,
        ancestors: AncestorRefs {
            church: slot("church_id")?,
            pastor: slot("pastor_id")?,
            copastor: slot("copastor_id")?,
            supervisor: slot("supervisor_id")?,
            zone: slot("zone_id")?,
            preacher: slot("preacher_id")?,
            family_group: slot("family_group_id")?,
        },
        payload: row.try_get("payload").map_err(store_error)?,
        inactivation: match (reason, inactivated_at) {
            (Some(reason), Some(at)) => Some(Inactivation { reason, at }),
            _ => None,
        },
        promoted_from: promoted_from.map(NodeId::from_uuid),
        created_at: row.try_get("created_at").map_err(store_error)?,
        updated_at: row.try_get("updated_at").map_err(store_error)?,
    })
}
