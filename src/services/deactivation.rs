//! Deactivation cascade
//!
//! Retiring a node flips only its own status. Every dependent that references
//! it loses that one slot and nothing else, so direct subordinates become
//! orphans awaiting reassignment rather than being retired with it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{HierarchyError, Result};
use crate::hierarchy::{Inactivation, Node, NodeId, NodeStatus};
use crate::store::{collect_slot, StoreTransaction};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deactivation {
    pub node: Node,
    /// False when the node was already inactive.
    pub status_changed: bool,
    /// Dependents whose slot pointing at the node was cleared.
    pub slots_cleared: usize,
    /// Direct subordinates left without a leader.
    pub orphaned: Vec<NodeId>,
    pub written: Vec<NodeId>,
}

#[derive(Debug, Clone, Copy)]
pub struct DeactivationCascade {
    page_size: usize,
}

impl DeactivationCascade {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
        }
    }

    /// Mark `node_id` inactive and clear every slot that points at it.
    ///
    /// Re-running on an inactive node keeps the original inactivation record
    /// and only repeats the dependent scan.
    pub async fn deactivate(
        &self,
        tx: &mut dyn StoreTransaction,
        node_id: NodeId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Deactivation> {
        let mut node = tx
            .get(node_id)
            .await?
            .ok_or(HierarchyError::NotFound(node_id))?;

        let mut written = Vec::new();
        let status_changed = node.is_active();
        if status_changed {
            node.status = NodeStatus::Inactive;
            node.inactivation = Some(Inactivation {
                reason: reason.to_string(),
                at: now,
            });
            node.touch(now);
            tx.upsert(&node).await?;
            written.push(node_id);
        } else {
            debug!("{} {} is already inactive", node.tier, node_id);
        }

        let dependents = collect_slot(tx, node.tier, node_id, self.page_size).await?;
        let mut orphaned = Vec::new();
        let mut slots_cleared = 0;
        for mut dependent in dependents {
            dependent.ancestors.set(node.tier, None);
            dependent.touch(now);
            tx.upsert(&dependent).await?;
            written.push(dependent.id);
            slots_cleared += 1;
            if dependent.leader_tier() == Some(node.tier) && dependent.is_active() {
                orphaned.push(dependent.id);
            }
        }

        info!(
            "Deactivated {} {} ({}): {} slot(s) cleared, {} orphaned",
            node.tier,
            node_id,
            reason,
            slots_cleared,
            orphaned.len()
        );

        Ok(Deactivation {
            node,
            status_changed,
            slots_cleared,
            orphaned,
            written,
        })
    }
}
