//! Ancestor-chain checks.
//!
//! Pure functions over a node and its resolved ancestors; no I/O. Every
//! service runs [`validate_chain`] on the nodes it wrote before committing.

use std::collections::BTreeMap;

use super::node::Node;
use super::tier::Tier;
use crate::error::{HierarchyError, Result};

/// Resolved ancestor nodes of one subject, keyed by tier.
#[derive(Debug, Clone, Default)]
pub struct Lineage {
    nodes: BTreeMap<Tier, Node>,
}

impl Lineage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lineage holding only the direct leader, enough to check mirroring.
    pub fn with_leader(leader: Node) -> Self {
        let mut lineage = Self::new();
        lineage.insert(leader);
        lineage
    }

    pub fn insert(&mut self, node: Node) {
        self.nodes.insert(node.tier, node);
    }

    pub fn get(&self, tier: Tier) -> Option<&Node> {
        self.nodes.get(&tier)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Every populated slot sits strictly above the node's own tier.
pub fn check_tier_monotonicity(node: &Node) -> Result<()> {
    match node
        .ancestors
        .iter()
        .find(|(tier, _)| !tier.is_above(node.tier))
    {
        Some((tier, _)) => Err(HierarchyError::ChainBroken { id: node.id, tier }),
        None => Ok(()),
    }
}

/// Check chain mirroring and tier order for `node` against its resolved `lineage`.
///
/// An Active node with a direct leader must mirror the leader's chain at every
/// tier above the leader, and hold the leader's id at the leader's tier.
/// Inactive and orphaned nodes only get the tier-order check. The returned
/// `ChainBroken` names the first tier (highest first) that fails.
pub fn validate_chain(node: &Node, lineage: &Lineage) -> Result<()> {
    check_tier_monotonicity(node)?;

    for (tier, id) in node.ancestors.iter() {
        if let Some(resolved) = lineage.get(tier) {
            if resolved.id != id {
                return Err(HierarchyError::ChainBroken { id: node.id, tier });
            }
        }
    }

    if !node.is_active() {
        return Ok(());
    }
    let (leader_tier, leader_id) = match (node.leader_tier(), node.direct_leader()) {
        (Some(tier), Some(id)) => (tier, id),
        _ => return Ok(()),
    };
    let leader = match lineage.get(leader_tier) {
        Some(leader) if leader.id == leader_id => leader,
        _ => {
            return Err(HierarchyError::ChainBroken {
                id: node.id,
                tier: leader_tier,
            })
        }
    };

    match node.ancestors.first_divergence_above(&leader.ancestors, leader_tier) {
        Some(tier) => Err(HierarchyError::ChainBroken { id: node.id, tier }),
        None => Ok(()),
    }
}

/// True when `node` references an ancestor at `tier` and that ancestor resolves to an Active node.
pub fn is_ancestor_active(node: &Node, tier: Tier, lineage: &Lineage) -> bool {
    match (node.ancestors.get(tier), lineage.get(tier)) {
        (Some(id), Some(ancestor)) => ancestor.id == id && ancestor.is_active(),
        _ => false,
    }
}

/// The chain a dependent of `leader` must carry: the leader's own slots above
/// its tier, plus the leader's id at its tier.
pub fn snapshot_for_dependent(leader: &Node) -> super::ancestry::AncestorRefs {
    let mut refs = leader.ancestors.truncated_above(leader.tier);
    refs.set(leader.tier, Some(leader.id));
    refs
}
