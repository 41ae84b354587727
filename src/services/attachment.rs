//! Node creation beneath a validated leader.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::resolver::AssignmentResolver;
use crate::error::{HierarchyError, Result};
use crate::hierarchy::{AncestorRefs, Node, NodeDraft, NodeId};
use crate::store::StoreTransaction;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub node: Node,
    pub written: Vec<NodeId>,
}

#[derive(Debug, Clone, Copy)]
pub struct AttachmentService {
    resolver: AssignmentResolver,
}

impl AttachmentService {
    pub fn new(resolver: AssignmentResolver) -> Self {
        Self { resolver }
    }

    pub async fn attach(
        &self,
        tx: &mut dyn StoreTransaction,
        draft: NodeDraft,
        leader: Option<NodeId>,
        now: DateTime<Utc>,
    ) -> Result<Attachment> {
        let ancestors = match (draft.tier.parent(), leader) {
            (None, None) => AncestorRefs::default(),
            (None, Some(_)) => {
                return Err(HierarchyError::InvalidRequest(format!(
                    "a {} takes no leader",
                    draft.tier
                )))
            }
            (Some(leader_tier), None) => {
                return Err(HierarchyError::InvalidRequest(format!(
                    "a {} needs a {} to attach to",
                    draft.tier, leader_tier
                )))
            }
            (Some(leader_tier), Some(leader_id)) => {
                let resolved = self
                    .resolver
                    .resolve_candidate(tx, leader_id, leader_tier)
                    .await?;
                self.resolver
                    .check_capacity(tx, &resolved.leader, draft.tier, &[])
                    .await?;
                resolved.snapshot
            }
        };

        let node = draft.into_node(ancestors, now);
        tx.upsert(&node).await?;
        info!("Attached {} {} under {:?}", node.tier, node.id, leader);

        Ok(Attachment {
            written: vec![node.id],
            node,
        })
    }
}
