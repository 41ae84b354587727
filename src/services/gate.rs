//! Pre-commit chain gate
//!
//! Re-reads every node an operation wrote (as the transaction sees it) and
//! checks it against its direct leader. Any failure aborts the unit.

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::{HierarchyError, Result};
use crate::hierarchy::{check_tier_monotonicity, validate_chain, Lineage, Node, NodeId};
use crate::store::StoreTransaction;

#[derive(Debug, Clone, Copy)]
pub struct ChainGate {
    enabled: bool,
}

impl ChainGate {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub async fn verify(&self, tx: &mut dyn StoreTransaction, written: &[NodeId]) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let mut leaders: HashMap<NodeId, Node> = HashMap::new();
        for id in written {
            let node = tx.get(*id).await?.ok_or_else(|| {
                HierarchyError::Aborted(format!("written node {} vanished before commit", id))
            })?;

            let (leader_tier, leader_id) = match (node.leader_tier(), node.direct_leader()) {
                (Some(tier), Some(leader)) if node.is_active() => (tier, leader),
                _ => {
                    check_tier_monotonicity(&node)?;
                    continue;
                }
            };

            if !leaders.contains_key(&leader_id) {
                match tx.get(leader_id).await? {
                    Some(leader) => {
                        leaders.insert(leader_id, leader);
                    }
                    None => {
                        warn!("Node {} points at missing leader {}", id, leader_id);
                        return Err(HierarchyError::ChainBroken {
                            id: *id,
                            tier: leader_tier,
                        });
                    }
                }
            }
            let lineage = leaders
                .get(&leader_id)
                .cloned()
                .map(Lineage::with_leader)
                .unwrap_or_default();
            validate_chain(&node, &lineage)?;
        }

        debug!("Chain gate passed for {} node(s)", written.len());
        Ok(())
    }
}
