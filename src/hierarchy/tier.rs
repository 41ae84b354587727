//! Organizational tiers and their fixed total order.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One rank of the organization, highest first.
///
/// The derived `Ord` follows declaration order, so `Tier::Church < Tier::Disciple`
/// reads as "Church ranks above Disciple".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Church,
    Pastor,
    Copastor,
    Supervisor,
    Zone,
    Preacher,
    FamilyGroup,
    Disciple,
}

impl Tier {
    /// All tiers, highest first.
    pub const ALL: [Tier; 8] = [
        Tier::Church,
        Tier::Pastor,
        Tier::Copastor,
        Tier::Supervisor,
        Tier::Zone,
        Tier::Preacher,
        Tier::FamilyGroup,
        Tier::Disciple,
    ];

    /// Tiers that can appear in an ancestor slot (everything but the leaf tier).
    pub const SLOTS: [Tier; 7] = [
        Tier::Church,
        Tier::Pastor,
        Tier::Copastor,
        Tier::Supervisor,
        Tier::Zone,
        Tier::Preacher,
        Tier::FamilyGroup,
    ];

    pub fn rank(self) -> usize {
        self as usize
    }

    /// The tier immediately above, i.e. the tier of a direct leader.
    pub fn parent(self) -> Option<Tier> {
        match self.rank() {
            0 => None,
            r => Some(Tier::ALL[r - 1]),
        }
    }

    /// The tier immediately below.
    pub fn child(self) -> Option<Tier> {
        Tier::ALL.get(self.rank() + 1).copied()
    }

    /// True when `self` ranks strictly above `other`.
    pub fn is_above(self, other: Tier) -> bool {
        self < other
    }

    /// Tiers strictly above this one, highest first.
    pub fn ancestors(self) -> &'static [Tier] {
        &Tier::ALL[..self.rank()]
    }

    /// Person-bearing tiers. Church, Zone and FamilyGroup are organizational units.
    pub fn is_person(self) -> bool {
        matches!(
            self,
            Tier::Pastor | Tier::Copastor | Tier::Supervisor | Tier::Preacher | Tier::Disciple
        )
    }

    /// Next rung on the leadership ladder, if any.
    ///
    /// Disciple -> Preacher -> Supervisor -> Copastor -> Pastor.
    pub fn promotion_target(self) -> Option<Tier> {
        if !self.is_person() {
            return None;
        }
        self.ancestors()
            .iter()
            .rev()
            .copied()
            .find(|tier| tier.is_person())
    }

    /// At most one active subordinate of this tier may share a direct leader.
    pub fn is_unique_per_leader(self) -> bool {
        matches!(self, Tier::Zone | Tier::FamilyGroup)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Church => "church",
            Tier::Pastor => "pastor",
            Tier::Copastor => "copastor",
            Tier::Supervisor => "supervisor",
            Tier::Zone => "zone",
            Tier::Preacher => "preacher",
            Tier::FamilyGroup => "family_group",
            Tier::Disciple => "disciple",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tier::ALL
            .iter()
            .copied()
            .find(|tier| tier.as_str() == s)
            .ok_or_else(|| format!("unknown tier '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_and_child_walk_the_order() {
        assert_eq!(Tier::Church.parent(), None);
        assert_eq!(Tier::Zone.parent(), Some(Tier::Supervisor));
        assert_eq!(Tier::FamilyGroup.child(), Some(Tier::Disciple));
        assert_eq!(Tier::Disciple.child(), None);
    }

    #[test]
    fn test_ancestors_are_strictly_above() {
        assert!(Tier::Church.ancestors().is_empty());
        assert_eq!(
            Tier::Preacher.ancestors(),
            &[
                Tier::Church,
                Tier::Pastor,
                Tier::Copastor,
                Tier::Supervisor,
                Tier::Zone
            ]
        );
        assert!(Tier::Pastor.is_above(Tier::Zone));
        assert!(!Tier::Zone.is_above(Tier::Zone));
    }

    #[test]
    fn test_promotion_ladder_skips_units() {
        assert_eq!(Tier::Disciple.promotion_target(), Some(Tier::Preacher));
        assert_eq!(Tier::Preacher.promotion_target(), Some(Tier::Supervisor));
        assert_eq!(Tier::Supervisor.promotion_target(), Some(Tier::Copastor));
        assert_eq!(Tier::Copastor.promotion_target(), Some(Tier::Pastor));
        assert_eq!(Tier::Pastor.promotion_target(), None);
        assert_eq!(Tier::Zone.promotion_target(), None);
    }

    #[test]
    fn test_round_trip_names() {
        for tier in Tier::ALL {
            assert_eq!(tier.as_str().parse::<Tier>(), Ok(tier));
        }
        assert!("bishop".parse::<Tier>().is_err());
    }
}
