//! Reassignment engine
//!
//! Three ways to change a node's leader:
//!
//! - `repoint` swaps the direct leader within the same upper branch and only
//!   rewrites the leader slot on descendants.
//! - `transfer` moves the node under a leader anywhere in the tree and
//!   re-stamps the full upper chain of the whole subtree.
//! - `exchange` swaps the direct leaders of two same-tier nodes, re-stamping
//!   both subtrees.
//!
//! Each operation reads and validates everything first, then writes. All
//! writes go through the caller's transaction; nothing here commits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::resolver::{AssignmentResolver, ResolvedChain};
use crate::config::ExchangePolicy;
use crate::error::{HierarchyError, Result};
use crate::hierarchy::{validate_chain, Node, NodeId, Tier};
use crate::store::{collect_slot, StoreTransaction};

/// Result of `repoint` or `transfer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reassignment {
    pub node: Node,
    pub previous_leader: Option<NodeId>,
    pub descendants_restamped: usize,
    /// Every node id written, subject first.
    pub written: Vec<NodeId>,
}

/// Result of `exchange`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub first: Node,
    pub second: Node,
    pub descendants_restamped: usize,
    pub written: Vec<NodeId>,
}

/// How descendants pick up a new upper chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Restamp {
    /// Overwrite only the slot at the new leader's tier.
    LeaderSlot,
    /// Replace every slot above the moved node's tier.
    FullChain,
}

#[derive(Debug, Clone, Copy)]
pub struct ReassignmentEngine {
    resolver: AssignmentResolver,
    exchange_policy: ExchangePolicy,
    page_size: usize,
}

impl ReassignmentEngine {
    pub fn new(
        resolver: AssignmentResolver,
        exchange_policy: ExchangePolicy,
        page_size: usize,
    ) -> Self {
        Self {
            resolver,
            exchange_policy,
            page_size: page_size.max(1),
        }
    }

    /// Give `node_id` a new direct leader that shares its upper branch.
    pub async fn repoint(
        &self,
        tx: &mut dyn StoreTransaction,
        node_id: NodeId,
        new_leader_id: NodeId,
        now: DateTime<Utc>,
    ) -> Result<Reassignment> {
        let node = load_active(tx, node_id).await?;
        let leader_tier = leader_tier_of(&node)?;
        let resolved = self
            .resolver
            .resolve_candidate(tx, new_leader_id, leader_tier)
            .await?;

        if let Some(tier) = node
            .ancestors
            .first_divergence_above(&resolved.snapshot, leader_tier)
        {
            return Err(HierarchyError::BranchMismatch {
                node: node_id,
                candidate: new_leader_id,
                tier,
            });
        }

        self.apply(tx, node, resolved, Restamp::LeaderSlot, now)
            .await
    }

    /// Move `node_id` and its subtree under `new_leader_id`, wherever it sits.
    pub async fn transfer(
        &self,
        tx: &mut dyn StoreTransaction,
        node_id: NodeId,
        new_leader_id: NodeId,
        now: DateTime<Utc>,
    ) -> Result<Reassignment> {
        let node = load_active(tx, node_id).await?;
        let leader_tier = leader_tier_of(&node)?;
        let resolved = self
            .resolver
            .resolve_candidate(tx, new_leader_id, leader_tier)
            .await?;

        self.apply(tx, node, resolved, Restamp::FullChain, now)
            .await
    }

    /// Swap the direct leaders of two same-tier nodes.
    pub async fn exchange(
        &self,
        tx: &mut dyn StoreTransaction,
        first_id: NodeId,
        second_id: NodeId,
        now: DateTime<Utc>,
    ) -> Result<Exchange> {
        if first_id == second_id {
            return Err(HierarchyError::InvalidRequest(format!(
                "cannot exchange {} with itself",
                first_id
            )));
        }

        let mut first = load_active(tx, first_id).await?;
        let mut second = load_active(tx, second_id).await?;
        if first.tier != second.tier {
            return Err(HierarchyError::TierMismatch {
                id: second_id,
                expected: first.tier,
                actual: second.tier,
            });
        }
        let leader_tier = leader_tier_of(&first)?;
        let first_leader = first.direct_leader().ok_or(HierarchyError::ChainBroken {
            id: first_id,
            tier: leader_tier,
        })?;
        let second_leader = second.direct_leader().ok_or(HierarchyError::ChainBroken {
            id: second_id,
            tier: leader_tier,
        })?;
        if first_leader == second_leader {
            return Err(HierarchyError::InvalidRequest(format!(
                "{} and {} already share leader {}",
                first_id, second_id, first_leader
            )));
        }

        // Each leader is resolved as a candidate for the other node.
        let for_second = self
            .resolver
            .resolve_candidate(tx, first_leader, leader_tier)
            .await?;
        let for_first = self
            .resolver
            .resolve_candidate(tx, second_leader, leader_tier)
            .await?;
        validate_chain(&first, &for_second.lineage)?;
        validate_chain(&second, &for_first.lineage)?;

        if self.exchange_policy == ExchangePolicy::SameBranch {
            if let Some(tier) = for_first
                .snapshot
                .first_divergence_above(&for_second.snapshot, leader_tier)
            {
                return Err(HierarchyError::BranchMismatch {
                    node: first_id,
                    candidate: second_leader,
                    tier,
                });
            }
        }

        let pair = [first_id, second_id];
        self.resolver
            .check_capacity(tx, &for_first.leader, first.tier, &pair)
            .await?;
        self.resolver
            .check_capacity(tx, &for_second.leader, second.tier, &pair)
            .await?;

        let first_descendants = collect_slot(tx, first.tier, first_id, self.page_size).await?;
        let second_descendants = collect_slot(tx, second.tier, second_id, self.page_size).await?;

        // Detach both before attaching either, so no leader ever holds two
        // subordinates of a unique tier at once.
        for node in [&mut first, &mut second] {
            node.ancestors.set(leader_tier, None);
            node.touch(now);
            tx.upsert(node).await?;
        }

        first.ancestors.graft_above(first.tier, &for_first.snapshot);
        second.ancestors.graft_above(second.tier, &for_second.snapshot);
        tx.upsert(&first).await?;
        tx.upsert(&second).await?;

        let mut written = vec![first_id, second_id];
        let mut restamped =
            restamp(tx, &first, first_descendants, Restamp::FullChain, now, &mut written).await?;
        restamped +=
            restamp(tx, &second, second_descendants, Restamp::FullChain, now, &mut written).await?;

        info!(
            "Exchanged leaders of {} {} and {} ({} <-> {}), {} descendant(s) re-stamped",
            first.tier, first_id, second_id, first_leader, second_leader, restamped
        );

        Ok(Exchange {
            first,
            second,
            descendants_restamped: restamped,
            written,
        })
    }

    async fn apply(
        &self,
        tx: &mut dyn StoreTransaction,
        mut node: Node,
        resolved: ResolvedChain,
        mode: Restamp,
        now: DateTime<Utc>,
    ) -> Result<Reassignment> {
        let previous_leader = node.direct_leader();
        if previous_leader == Some(resolved.leader.id)
            && node
                .ancestors
                .first_divergence_above(&resolved.snapshot, resolved.leader.tier)
                .is_none()
        {
            debug!("{} already reports to {}", node.id, resolved.leader.id);
            return Ok(Reassignment {
                node,
                previous_leader,
                descendants_restamped: 0,
                written: Vec::new(),
            });
        }

        self.resolver
            .check_capacity(tx, &resolved.leader, node.tier, &[node.id])
            .await?;
        let descendants = collect_slot(tx, node.tier, node.id, self.page_size).await?;

        node.ancestors.graft_above(node.tier, &resolved.snapshot);
        node.touch(now);
        tx.upsert(&node).await?;

        let mut written = vec![node.id];
        let restamped = restamp(tx, &node, descendants, mode, now, &mut written).await?;

        info!(
            "Moved {} {} from {:?} to {} ({:?}), {} descendant(s) re-stamped",
            node.tier, node.id, previous_leader, resolved.leader.id, mode, restamped
        );

        Ok(Reassignment {
            node,
            previous_leader,
            descendants_restamped: restamped,
            written,
        })
    }
}

/// Rewrite `descendants` of `moved` so their chains agree with its new one.
async fn restamp(
    tx: &mut dyn StoreTransaction,
    moved: &Node,
    descendants: Vec<Node>,
    mode: Restamp,
    now: DateTime<Utc>,
    written: &mut Vec<NodeId>,
) -> Result<usize> {
    let leader_tier = match moved.leader_tier() {
        Some(tier) => tier,
        None => return Ok(0),
    };

    let mut restamped = 0;
    for mut descendant in descendants {
        let before = descendant.ancestors.clone();
        match mode {
            Restamp::LeaderSlot => descendant
                .ancestors
                .set(leader_tier, moved.ancestors.get(leader_tier)),
            Restamp::FullChain => descendant.ancestors.graft_above(moved.tier, &moved.ancestors),
        }
        if descendant.ancestors == before {
            continue;
        }
        descendant.touch(now);
        tx.upsert(&descendant).await?;
        written.push(descendant.id);
        restamped += 1;
    }

    debug!("Re-stamped {} descendant(s) of {}", restamped, moved.id);
    Ok(restamped)
}

pub(crate) async fn load_active(tx: &mut dyn StoreTransaction, id: NodeId) -> Result<Node> {
    let node = tx.get(id).await?.ok_or(HierarchyError::NotFound(id))?;
    if !node.is_active() {
        return Err(HierarchyError::InactiveNode(id));
    }
    Ok(node)
}

fn leader_tier_of(node: &Node) -> Result<Tier> {
    node.leader_tier().ok_or_else(|| {
        HierarchyError::InvalidRequest(format!("{} {} has no leader tier", node.tier, node.id))
    })
}
