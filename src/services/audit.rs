//! Read-only invariant sweep
//!
//! Reports broken chains, duplicate Zone/FamilyGroup subordinates and slots
//! pointing at nodes that are missing or inactive.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::{HierarchyError, Result};
use crate::hierarchy::{check_tier_monotonicity, validate_chain, Lineage, Node, NodeId, Tier};
use crate::store::{collect_slot, StoreTransaction};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationKind {
    /// Mirroring or tier-order failure at `tier`.
    ChainBroken { tier: Tier },
    /// Slot at `tier` references a node that is missing or inactive.
    DanglingRef { tier: Tier, target: NodeId },
    /// Another active node of the same unique tier shares the leader.
    DuplicateSubordinate { leader: NodeId, other: NodeId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub node: NodeId,
    #[serde(flatten)]
    pub kind: ViolationKind,
}

/// Audit a complete set of nodes (e.g. a store snapshot).
pub fn audit_nodes(nodes: &[Node]) -> Vec<Violation> {
    let index: HashMap<NodeId, &Node> = nodes.iter().map(|node| (node.id, node)).collect();
    audit_with(nodes.iter(), &index)
}

/// Audit `root` and every node carrying it in an ancestor slot.
pub async fn audit_subtree(
    tx: &mut dyn StoreTransaction,
    root_id: NodeId,
    page_size: usize,
) -> Result<Vec<Violation>> {
    let root = tx
        .get(root_id)
        .await?
        .ok_or(HierarchyError::NotFound(root_id))?;
    let mut subject = vec![root.clone()];
    subject.extend(collect_slot(tx, root.tier, root_id, page_size).await?);

    // Referenced nodes outside the subtree (the root's own chain) are loaded
    // for comparison but not audited themselves.
    let mut known: HashMap<NodeId, Node> =
        subject.iter().map(|node| (node.id, node.clone())).collect();
    let referenced: Vec<NodeId> = subject
        .iter()
        .flat_map(|node| node.ancestors.iter().map(|(_, id)| id))
        .collect();
    for id in referenced {
        if known.contains_key(&id) {
            continue;
        }
        if let Some(node) = tx.get(id).await? {
            known.insert(id, node);
        }
    }

    let index: HashMap<NodeId, &Node> = known.iter().map(|(id, node)| (*id, node)).collect();
    Ok(audit_with(subject.iter(), &index))
}

fn audit_with<'a>(
    subject: impl Iterator<Item = &'a Node>,
    index: &HashMap<NodeId, &Node>,
) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut unique: BTreeMap<(NodeId, Tier), NodeId> = BTreeMap::new();

    for node in subject {
        if let Err(HierarchyError::ChainBroken { tier, .. }) = check_tier_monotonicity(node) {
            violations.push(Violation {
                node: node.id,
                kind: ViolationKind::ChainBroken { tier },
            });
            continue;
        }
        if !node.is_active() {
            continue;
        }

        for (tier, target) in node.ancestors.iter() {
            let live = index
                .get(&target)
                .map_or(false, |ancestor| ancestor.is_active() && ancestor.tier == tier);
            if !live {
                violations.push(Violation {
                    node: node.id,
                    kind: ViolationKind::DanglingRef { tier, target },
                });
            }
        }

        if let Some(leader) = node.direct_leader().and_then(|id| index.get(&id)) {
            if let Err(HierarchyError::ChainBroken { tier, .. }) =
                validate_chain(node, &Lineage::with_leader((*leader).clone()))
            {
                violations.push(Violation {
                    node: node.id,
                    kind: ViolationKind::ChainBroken { tier },
                });
            }
        }

        if let (true, Some(leader)) = (node.tier.is_unique_per_leader(), node.direct_leader()) {
            if let Some(other) = unique.insert((leader, node.tier), node.id) {
                violations.push(Violation {
                    node: node.id,
                    kind: ViolationKind::DuplicateSubordinate { leader, other },
                });
            }
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{snapshot_for_dependent, AncestorRefs, NodeDraft, NodeStatus};
    use chrono::Utc;
    use serde_json::json;

    fn node(tier: Tier, ancestors: AncestorRefs) -> Node {
        NodeDraft::new(tier, json!({})).into_node(ancestors, Utc::now())
    }

    #[test]
    fn test_consistent_graph_is_clean() {
        let church = node(Tier::Church, AncestorRefs::default());
        let pastor = node(Tier::Pastor, snapshot_for_dependent(&church));
        assert!(audit_nodes(&[church, pastor]).is_empty());
    }

    #[test]
    fn test_reports_dangling_and_broken_chains() {
        let church = node(Tier::Church, AncestorRefs::default());
        let mut pastor = node(Tier::Pastor, snapshot_for_dependent(&church));
        let copastor = node(Tier::Copastor, snapshot_for_dependent(&pastor));
        pastor.ancestors.church = Some(NodeId::new());

        let violations = audit_nodes(&[church, pastor.clone(), copastor.clone()]);

        assert!(violations.contains(&Violation {
            node: pastor.id,
            kind: ViolationKind::DanglingRef {
                tier: Tier::Church,
                target: pastor.ancestors.church.unwrap_or_default(),
            },
        }));
        assert!(violations.contains(&Violation {
            node: copastor.id,
            kind: ViolationKind::ChainBroken { tier: Tier::Church },
        }));
    }

    #[test]
    fn test_reports_duplicate_family_groups() {
        let preacher = node(Tier::Preacher, AncestorRefs::default());
        let first = node(Tier::FamilyGroup, snapshot_for_dependent(&preacher));
        let second = node(Tier::FamilyGroup, snapshot_for_dependent(&preacher));
        let mut retired = node(Tier::FamilyGroup, snapshot_for_dependent(&preacher));
        retired.status = NodeStatus::Inactive;

        let violations = audit_nodes(&[preacher.clone(), first, second, retired]);
        let duplicates: Vec<_> = violations
            .iter()
            .filter(|v| matches!(v.kind, ViolationKind::DuplicateSubordinate { .. }))
            .collect();
        assert_eq!(duplicates.len(), 1);
    }
}
