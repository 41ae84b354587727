//! Assignment resolver
//!
//! Validates a candidate leader and computes the ancestor snapshot a
//! dependent of that leader must carry. Read-only.

use tracing::debug;

use crate::error::{HierarchyError, Result};
use crate::hierarchy::{
    is_ancestor_active, snapshot_for_dependent, validate_chain, AncestorRefs, Lineage, Node,
    NodeId, Tier,
};
use crate::store::StoreTransaction;

/// A validated leader together with its resolved ancestors.
#[derive(Debug, Clone)]
pub struct ResolvedChain {
    pub leader: Node,
    /// The leader and every ancestor above it.
    pub lineage: Lineage,
    /// Chain to stamp onto a dependent: the leader's slots plus the leader itself.
    pub snapshot: AncestorRefs,
}

#[derive(Debug, Clone, Copy)]
pub struct AssignmentResolver {
    page_size: usize,
}

impl AssignmentResolver {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
        }
    }

    /// Confirm `candidate_id` can lead a node one tier below `expected_tier`.
    pub async fn resolve_candidate(
        &self,
        tx: &mut dyn StoreTransaction,
        candidate_id: NodeId,
        expected_tier: Tier,
    ) -> Result<ResolvedChain> {
        let candidate = tx
            .get(candidate_id)
            .await?
            .ok_or(HierarchyError::NotFound(candidate_id))?;

        if !candidate.is_active() {
            return Err(HierarchyError::InactiveLeader { id: candidate_id });
        }
        if candidate.tier != expected_tier {
            return Err(HierarchyError::TierMismatch {
                id: candidate_id,
                expected: expected_tier,
                actual: candidate.tier,
            });
        }

        let mut lineage = Lineage::new();
        for tier in candidate.tier.ancestors() {
            let ancestor_id =
                candidate
                    .ancestors
                    .get(*tier)
                    .ok_or(HierarchyError::IncompleteChain {
                        id: candidate_id,
                        missing: *tier,
                    })?;
            if let Some(ancestor) = tx.get(ancestor_id).await? {
                lineage.insert(ancestor);
            }
            if !is_ancestor_active(&candidate, *tier, &lineage) {
                return Err(HierarchyError::IncompleteChain {
                    id: candidate_id,
                    missing: *tier,
                });
            }
        }

        // A leader whose own chain disagrees with its leader cannot hand it down.
        if let Err(HierarchyError::ChainBroken { tier, .. }) = validate_chain(&candidate, &lineage)
        {
            return Err(HierarchyError::IncompleteChain {
                id: candidate_id,
                missing: tier,
            });
        }

        let snapshot = snapshot_for_dependent(&candidate);
        lineage.insert(candidate.clone());
        debug!(
            "Resolved {} {} with {} ancestor(s)",
            candidate.tier,
            candidate_id,
            lineage.len() - 1
        );

        Ok(ResolvedChain {
            leader: candidate,
            lineage,
            snapshot,
        })
    }

    /// Refuse a second active Zone/FamilyGroup under `leader`.
    ///
    /// Nodes in `exclude` are ignored, so a node already attached to `leader`
    /// (or about to leave it) does not conflict with itself.
    pub async fn check_capacity(
        &self,
        tx: &mut dyn StoreTransaction,
        leader: &Node,
        subordinate_tier: Tier,
        exclude: &[NodeId],
    ) -> Result<()> {
        if !subordinate_tier.is_unique_per_leader() {
            return Ok(());
        }

        let mut after = None;
        loop {
            let page = tx
                .find_subordinates(leader.tier, leader.id, after, self.page_size)
                .await?;
            if let Some(existing) = page.iter().find(|node| {
                node.tier == subordinate_tier && node.is_active() && !exclude.contains(&node.id)
            }) {
                return Err(HierarchyError::UniquenessConflict {
                    leader: leader.id,
                    tier: subordinate_tier,
                    existing: existing.id,
                });
            }
            if page.len() < self.page_size {
                return Ok(());
            }
            after = page.last().map(|node| node.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::hierarchy::{NodeDraft, NodeStatus};
    use crate::store::{EntityStore, MemoryStore, StoreResult};
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;

    /// Counts the nodes each read hands back.
    struct CountingTransaction {
        inner: Box<dyn StoreTransaction>,
        rows_read: usize,
    }

    #[async_trait]
    impl StoreTransaction for CountingTransaction {
        async fn get(&mut self, id: NodeId) -> StoreResult<Option<Node>> {
            let node = self.inner.get(id).await?;
            self.rows_read += usize::from(node.is_some());
            Ok(node)
        }

        async fn find_by_ancestor_slot(
            &mut self,
            tier: Tier,
            id: NodeId,
            after: Option<NodeId>,
            limit: usize,
        ) -> StoreResult<Vec<Node>> {
            let page = self.inner.find_by_ancestor_slot(tier, id, after, limit).await?;
            self.rows_read += page.len();
            Ok(page)
        }

        async fn find_subordinates(
            &mut self,
            leader_tier: Tier,
            leader: NodeId,
            after: Option<NodeId>,
            limit: usize,
        ) -> StoreResult<Vec<Node>> {
            let page = self
                .inner
                .find_subordinates(leader_tier, leader, after, limit)
                .await?;
            self.rows_read += page.len();
            Ok(page)
        }

        async fn upsert(&mut self, node: &Node) -> StoreResult<()> {
            self.inner.upsert(node).await
        }

        async fn commit(self: Box<Self>) -> StoreResult<()> {
            self.inner.commit().await
        }

        async fn rollback(self: Box<Self>) -> StoreResult<()> {
            self.inner.rollback().await
        }
    }

    fn node(tier: Tier, ancestors: AncestorRefs) -> Node {
        NodeDraft::new(tier, json!({})).into_node(ancestors, Utc::now())
    }

    /// Church -> Pastor -> Copastor -> Supervisor, committed.
    async fn seeded() -> (MemoryStore, Vec<Node>) {
        let store = MemoryStore::new();
        let church = node(Tier::Church, AncestorRefs::default());
        let pastor = node(Tier::Pastor, snapshot_for_dependent(&church));
        let copastor = node(Tier::Copastor, snapshot_for_dependent(&pastor));
        let supervisor = node(Tier::Supervisor, snapshot_for_dependent(&copastor));
        let nodes = vec![church, pastor, copastor, supervisor];

        let mut tx = store.begin().await.expect("begin");
        for n in &nodes {
            tx.upsert(n).await.expect("upsert");
        }
        tx.commit().await.expect("commit");
        (store, nodes)
    }

    #[tokio::test]
    async fn test_resolves_full_snapshot() {
        let (store, nodes) = seeded().await;
        let supervisor = &nodes[3];
        let resolver = AssignmentResolver::new(10);
        let mut tx = store.begin().await.expect("begin");

        let resolved = resolver
            .resolve_candidate(tx.as_mut(), supervisor.id, Tier::Supervisor)
            .await
            .expect("resolve");

        assert_eq!(resolved.snapshot.church, Some(nodes[0].id));
        assert_eq!(resolved.snapshot.copastor, Some(nodes[2].id));
        assert_eq!(resolved.snapshot.supervisor, Some(supervisor.id));
        assert_eq!(resolved.snapshot.zone, None);
        assert_eq!(resolved.lineage.len(), 4);
    }

    #[tokio::test]
    async fn test_rejections_in_order() {
        let (store, nodes) = seeded().await;
        let resolver = AssignmentResolver::new(10);
        let mut tx = store.begin().await.expect("begin");

        let missing = resolver
            .resolve_candidate(tx.as_mut(), NodeId::new(), Tier::Supervisor)
            .await
            .unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);

        let wrong_tier = resolver
            .resolve_candidate(tx.as_mut(), nodes[2].id, Tier::Supervisor)
            .await
            .unwrap_err();
        assert_eq!(wrong_tier.kind(), ErrorKind::TierMismatch);

        let mut retired = nodes[3].clone();
        retired.status = NodeStatus::Inactive;
        tx.upsert(&retired).await.expect("upsert");
        let inactive = resolver
            .resolve_candidate(tx.as_mut(), retired.id, Tier::Supervisor)
            .await
            .unwrap_err();
        assert_eq!(inactive.kind(), ErrorKind::InactiveLeader);
    }

    #[tokio::test]
    async fn test_missing_upper_slot_is_incomplete() {
        let (store, nodes) = seeded().await;
        let resolver = AssignmentResolver::new(10);
        let mut tx = store.begin().await.expect("begin");

        let mut supervisor = nodes[3].clone();
        supervisor.ancestors.copastor = None;
        tx.upsert(&supervisor).await.expect("upsert");

        let err = resolver
            .resolve_candidate(tx.as_mut(), supervisor.id, Tier::Supervisor)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HierarchyError::IncompleteChain {
                missing: Tier::Copastor,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_inactive_ancestor_is_incomplete() {
        let (store, nodes) = seeded().await;
        let resolver = AssignmentResolver::new(10);
        let mut tx = store.begin().await.expect("begin");

        let mut pastor = nodes[1].clone();
        pastor.status = NodeStatus::Inactive;
        tx.upsert(&pastor).await.expect("upsert");

        let err = resolver
            .resolve_candidate(tx.as_mut(), nodes[3].id, Tier::Supervisor)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HierarchyError::IncompleteChain {
                missing: Tier::Pastor,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_capacity_check_honours_exclusions() {
        let (store, nodes) = seeded().await;
        let supervisor = nodes[3].clone();
        let zone = node(Tier::Zone, snapshot_for_dependent(&supervisor));
        let resolver = AssignmentResolver::new(1);
        let mut tx = store.begin().await.expect("begin");
        tx.upsert(&zone).await.expect("upsert");

        let err = resolver
            .check_capacity(tx.as_mut(), &supervisor, Tier::Zone, &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UniquenessConflict);

        resolver
            .check_capacity(tx.as_mut(), &supervisor, Tier::Zone, &[zone.id])
            .await
            .expect("excluded zone does not count");
        resolver
            .check_capacity(tx.as_mut(), &supervisor, Tier::Preacher, &[])
            .await
            .expect("preachers are not unique per leader");
    }

    #[tokio::test]
    async fn test_capacity_check_reads_only_direct_subordinates() {
        let (store, nodes) = seeded().await;
        let supervisor = nodes[3].clone();
        let zone = node(Tier::Zone, snapshot_for_dependent(&supervisor));
        let resolver = AssignmentResolver::new(2);
        let mut tx = CountingTransaction {
            inner: store.begin().await.expect("begin"),
            rows_read: 0,
        };
        tx.upsert(&zone).await.expect("zone");
        for _ in 0..6 {
            let preacher = node(Tier::Preacher, snapshot_for_dependent(&zone));
            tx.upsert(&preacher).await.expect("preacher");
            let group = node(Tier::FamilyGroup, snapshot_for_dependent(&preacher));
            tx.upsert(&group).await.expect("family group");
        }

        resolver
            .check_capacity(&mut tx, &supervisor, Tier::Zone, &[zone.id])
            .await
            .expect("only the excluded zone sits under the supervisor");
        assert_eq!(tx.rows_read, 1);

        let err = resolver
            .check_capacity(&mut tx, &supervisor, Tier::Zone, &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HierarchyError::UniquenessConflict { existing, .. } if existing == zone.id
        ));
    }
}
