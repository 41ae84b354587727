//! Promotion transform
//!
//! A node's tier is part of its identity, so a promotion retires the old node
//! and creates a new one one rung up the leadership ladder. Financial records
//! follow the person to the new node; former subordinates are orphaned.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::deactivation::DeactivationCascade;
use super::reassignment::load_active;
use super::resolver::AssignmentResolver;
use crate::error::{HierarchyError, Result};
use crate::hierarchy::{Node, NodeDraft, NodeId, Tier};
use crate::store::{AttributionRebinder, StoreTransaction};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Promotion {
    pub retired: Node,
    pub promoted: Node,
    pub records_rebound: u64,
    pub slots_cleared: usize,
    pub orphaned: Vec<NodeId>,
    pub written: Vec<NodeId>,
}

#[derive(Clone)]
pub struct PromotionTransform {
    resolver: AssignmentResolver,
    cascade: DeactivationCascade,
    rebinder: Arc<dyn AttributionRebinder>,
}

impl PromotionTransform {
    pub fn new(
        resolver: AssignmentResolver,
        cascade: DeactivationCascade,
        rebinder: Arc<dyn AttributionRebinder>,
    ) -> Self {
        Self {
            resolver,
            cascade,
            rebinder,
        }
    }

    /// Stage the promotion of `node_id` to `target_tier` under `upper_leader_id`.
    ///
    /// Attribution rebinding happens outside the store transaction; if a
    /// later step fails it is reversed before the error is returned. A commit
    /// failure after this returns must be followed by [`Self::compensate`].
    /// When the reversal itself fails the caller gets
    /// [`HierarchyError::AttributionStranded`] instead of the original error.
    pub async fn promote(
        &self,
        tx: &mut dyn StoreTransaction,
        node_id: NodeId,
        target_tier: Tier,
        upper_leader_id: NodeId,
        now: DateTime<Utc>,
    ) -> Result<Promotion> {
        let node = load_active(tx, node_id).await?;
        let invalid = || HierarchyError::InvalidPromotion {
            id: node_id,
            from: node.tier,
            to: target_tier,
        };
        if node.tier.promotion_target() != Some(target_tier) {
            return Err(invalid());
        }
        let leader_tier = target_tier.parent().ok_or_else(invalid)?;

        let resolved = self
            .resolver
            .resolve_candidate(tx, upper_leader_id, leader_tier)
            .await?;
        self.resolver
            .check_capacity(tx, &resolved.leader, target_tier, &[])
            .await?;

        let mut promoted = NodeDraft::new(target_tier, node.payload.clone())
            .into_node(resolved.snapshot.clone(), now);
        promoted.promoted_from = Some(node_id);
        tx.upsert(&promoted).await?;

        let records_rebound = self
            .rebinder
            .rebind_contributor(node_id, promoted.id)
            .await?;

        let reason = format!("promoted to {} {}", target_tier, promoted.id);
        let retirement = match self.cascade.deactivate(tx, node_id, &reason, now).await {
            Ok(retirement) => retirement,
            Err(e) => {
                self.compensate(promoted.id, node_id).await?;
                return Err(e);
            }
        };

        let mut written = vec![promoted.id];
        written.extend(retirement.written);

        info!(
            "Promoted {} {} to {} {} under {}, {} record(s) rebound",
            node.tier, node_id, target_tier, promoted.id, upper_leader_id, records_rebound
        );

        Ok(Promotion {
            retired: retirement.node,
            promoted,
            records_rebound,
            slots_cleared: retirement.slots_cleared,
            orphaned: retirement.orphaned,
            written,
        })
    }

    /// Reverse an attribution rebinding from `promoted` back to `retired`.
    ///
    /// Returns the number of records moved back. A failure leaves them on
    /// `promoted` and is reported as [`HierarchyError::AttributionStranded`].
    pub async fn compensate(&self, promoted: NodeId, retired: NodeId) -> Result<u64> {
        warn!("Reversing attribution rebinding {} -> {}", promoted, retired);
        self.rebinder
            .rebind_contributor(promoted, retired)
            .await
            .map_err(|e| {
                error!(
                    "Failed to reverse attribution rebinding {} -> {}: {}",
                    promoted, retired, e
                );
                HierarchyError::AttributionStranded {
                    retired,
                    promoted,
                    reason: e.to_string(),
                }
            })
    }
}

impl std::fmt::Debug for PromotionTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromotionTransform")
            .field("resolver", &self.resolver)
            .field("cascade", &self.cascade)
            .finish_non_exhaustive()
    }
}
