//! Node identifiers and the denormalized ancestor chain.
//!
//! Every node carries one optional reference per tier above its own. All
//! mutation of these slots goes through the services layer; the struct itself
//! only offers typed accessors.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::tier::Tier;

/// Opaque, immutable node identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for NodeId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One optional reference per ancestor tier. `None` means "unassigned".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AncestorRefs {
    pub church: Option<NodeId>,
    pub pastor: Option<NodeId>,
    pub copastor: Option<NodeId>,
    pub supervisor: Option<NodeId>,
    pub zone: Option<NodeId>,
    pub preacher: Option<NodeId>,
    pub family_group: Option<NodeId>,
}

impl AncestorRefs {
    pub fn get(&self, tier: Tier) -> Option<NodeId> {
        match tier {
            Tier::Church => self.church,
            Tier::Pastor => self.pastor,
            Tier::Copastor => self.copastor,
            Tier::Supervisor => self.supervisor,
            Tier::Zone => self.zone,
            Tier::Preacher => self.preacher,
            Tier::FamilyGroup => self.family_group,
            Tier::Disciple => None,
        }
    }

    /// Set or clear one slot. Disciples are never ancestors, so that slot is ignored.
    pub(crate) fn set(&mut self, tier: Tier, id: Option<NodeId>) {
        let slot = match tier {
            Tier::Church => &mut self.church,
            Tier::Pastor => &mut self.pastor,
            Tier::Copastor => &mut self.copastor,
            Tier::Supervisor => &mut self.supervisor,
            Tier::Zone => &mut self.zone,
            Tier::Preacher => &mut self.preacher,
            Tier::FamilyGroup => &mut self.family_group,
            Tier::Disciple => return,
        };
        *slot = id;
    }

    /// Populated slots, highest tier first.
    pub fn iter(&self) -> impl Iterator<Item = (Tier, NodeId)> + '_ {
        Tier::SLOTS
            .iter()
            .filter_map(move |tier| self.get(*tier).map(|id| (*tier, id)))
    }

    /// True when `id` sits in any slot.
    pub fn contains(&self, id: NodeId) -> bool {
        self.iter().any(|(_, slot)| slot == id)
    }

    /// Copy of the slots strictly above `tier`; everything at or below is cleared.
    pub fn truncated_above(&self, tier: Tier) -> AncestorRefs {
        let mut refs = AncestorRefs::default();
        for ancestor in tier.ancestors() {
            refs.set(*ancestor, self.get(*ancestor));
        }
        refs
    }

    /// Replace every slot strictly above `tier` with the values from `upper`,
    /// keeping the slots at and below `tier` untouched.
    pub(crate) fn graft_above(&mut self, tier: Tier, upper: &AncestorRefs) {
        for ancestor in tier.ancestors() {
            self.set(*ancestor, upper.get(*ancestor));
        }
    }

    /// First tier where the two chains disagree, looking only at tiers strictly above `tier`.
    pub fn first_divergence_above(&self, other: &AncestorRefs, tier: Tier) -> Option<Tier> {
        tier.ancestors()
            .iter()
            .copied()
            .find(|ancestor| self.get(*ancestor) != other.get(*ancestor))
    }
}
