//! Hierarchy graph model
//!
//! Typed nodes, the per-tier ancestor chain they carry, and the pure
//! invariant checks the services run before committing.

pub mod ancestry;
pub mod chain;
pub mod node;
pub mod tier;

pub use ancestry::{AncestorRefs, NodeId};
pub use chain::{
    check_tier_monotonicity, is_ancestor_active, snapshot_for_dependent, validate_chain, Lineage,
};
pub use node::{Inactivation, Node, NodeDraft, NodeStatus};
pub use tier::Tier;
