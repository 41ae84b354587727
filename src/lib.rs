//! Ministry hierarchy engine
//!
//! Maintains an eight-tier organizational graph (Church, Pastor, Copastor,
//! Supervisor, Zone, Preacher, FamilyGroup, Disciple) in which every node
//! carries a denormalized copy of its ancestor chain. The services keep
//! those copies consistent across reassignment, exchange, deactivation and
//! promotion, with each operation committing atomically.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ministry_hierarchy::{
//!     EngineConfig, HierarchyEngine, MemoryLedger, MemoryStore, NodeDraft, Tier,
//! };
//!
//! # async fn demo() -> ministry_hierarchy::Result<()> {
//! let engine = HierarchyEngine::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(MemoryLedger::new()),
//!     EngineConfig::default(),
//! );
//! let church = engine
//!     .attach(NodeDraft::new(Tier::Church, serde_json::json!({"name": "Central"})), None)
//!     .await?;
//! let pastor = engine
//!     .attach(NodeDraft::new(Tier::Pastor, serde_json::json!({})), Some(church.id))
//!     .await?;
//! assert_eq!(pastor.ancestors.church, Some(church.id));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod hierarchy;
pub mod services;
pub mod store;

#[cfg(feature = "database")]
pub mod database;

pub use config::{EngineConfig, ExchangePolicy};
pub use error::{ErrorKind, HierarchyError, Result, StoreError};
pub use hierarchy::{AncestorRefs, Inactivation, Node, NodeDraft, NodeId, NodeStatus, Tier};
pub use services::{
    Deactivation, Exchange, HierarchyEngine, Promotion, Reassignment, Violation, ViolationKind,
};
pub use store::{AttributionRebinder, EntityStore, MemoryLedger, MemoryStore, StoreTransaction};
