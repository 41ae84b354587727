//! Hierarchy services
//!
//! Resolver, reassignment, deactivation and promotion all operate on a
//! caller-supplied store transaction; `HierarchyEngine` owns the transaction
//! boundary, locking and the pre-commit gate.

pub mod attachment;
pub mod audit;
pub mod deactivation;
pub mod engine;
pub mod gate;
pub mod locks;
pub mod promotion;
pub mod reassignment;
pub mod resolver;

pub use attachment::{Attachment, AttachmentService};
pub use audit::{audit_nodes, audit_subtree, Violation, ViolationKind};
pub use deactivation::{Deactivation, DeactivationCascade};
pub use engine::HierarchyEngine;
pub use gate::ChainGate;
pub use locks::{SubtreeGuard, SubtreeLocks};
pub use promotion::{Promotion, PromotionTransform};
pub use reassignment::{Exchange, Reassignment, ReassignmentEngine};
pub use resolver::{AssignmentResolver, ResolvedChain};
