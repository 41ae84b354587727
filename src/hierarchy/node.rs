//! Hierarchy nodes and their lifecycle metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ancestry::{AncestorRefs, NodeId};
use super::tier::Tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Active,
    Inactive,
}

impl NodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Active => "active",
            NodeStatus::Inactive => "inactive",
        }
    }
}

impl std::str::FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(NodeStatus::Active),
            "inactive" => Ok(NodeStatus::Inactive),
            other => Err(format!("unknown node status '{}'", other)),
        }
    }
}

/// Why and when a node was retired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inactivation {
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// One organizational entity.
///
/// `payload` holds the domain data (names, addresses, dates, codes) and is
/// never interpreted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub tier: Tier,
    pub status: NodeStatus,
    pub ancestors: AncestorRefs,
    pub payload: serde_json::Value,
    pub inactivation: Option<Inactivation>,
    /// Node this one replaced through a promotion.
    pub promoted_from: Option<NodeId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }

    /// Tier of the direct leader, `None` for a Church.
    pub fn leader_tier(&self) -> Option<Tier> {
        self.tier.parent()
    }

    /// The ancestor one tier above. `None` for a Church or an orphaned node.
    pub fn direct_leader(&self) -> Option<NodeId> {
        self.leader_tier().and_then(|tier| self.ancestors.get(tier))
    }

    /// Active, not a Church, and missing its direct leader.
    pub fn is_orphaned(&self) -> bool {
        self.is_active() && self.leader_tier().is_some() && self.direct_leader().is_none()
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

/// Input for creating a node under a leader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDraft {
    pub tier: Tier,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl NodeDraft {
    pub fn new(tier: Tier, payload: serde_json::Value) -> Self {
        Self { tier, payload }
    }

    pub(crate) fn into_node(self, ancestors: AncestorRefs, now: DateTime<Utc>) -> Node {
        Node {
            id: NodeId::new(),
            tier: self.tier,
            status: NodeStatus::Active,
            ancestors,
            payload: self.payload,
            inactivation: None,
            promoted_from: None,
            created_at: now,
            updated_at: now,
        }
    }
}
