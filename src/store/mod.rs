//! Storage port traits
//!
//! The engine depends only on these traits. `memory` provides the in-process
//! implementation; the `database` module provides Postgres adapters.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::hierarchy::{Node, NodeId, Tier};

pub mod memory;

pub use memory::{AttributionRecord, MemoryLedger, MemoryStore};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Entry point to the persisted hierarchy.
///
/// Every read and write of one engine operation happens inside a single
/// [`StoreTransaction`]; implementations must make the whole unit commit or
/// vanish together.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;
}

/// One atomic unit of work against the store.
///
/// Reads observe the transaction's own staged writes. Dropping a transaction
/// without committing discards it.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn get(&mut self, id: NodeId) -> StoreResult<Option<Node>>;

    /// One page of nodes whose `tier` slot holds `id`, ordered by node id and
    /// starting strictly after `after`. An empty or short page ends the scan.
    async fn find_by_ancestor_slot(
        &mut self,
        tier: Tier,
        id: NodeId,
        after: Option<NodeId>,
        limit: usize,
    ) -> StoreResult<Vec<Node>>;

    /// One page of the nodes directly led by `leader` (a `leader_tier` node),
    /// ordered by node id and starting strictly after `after`. Deeper
    /// descendants are not returned.
    async fn find_subordinates(
        &mut self,
        leader_tier: Tier,
        leader: NodeId,
        after: Option<NodeId>,
        limit: usize,
    ) -> StoreResult<Vec<Node>>;

    /// Insert or replace a node. Fails with `StoreError::Conflict` when the
    /// write would give a leader a second active Zone or FamilyGroup.
    async fn upsert(&mut self, node: &Node) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// Rebinds financial records (offerings) from one contributor to another.
#[async_trait]
pub trait AttributionRebinder: Send + Sync {
    /// Returns the number of records updated.
    async fn rebind_contributor(&self, old: NodeId, new: NodeId) -> StoreResult<u64>;
}

/// Drain every page of a slot scan.
pub async fn collect_slot(
    tx: &mut dyn StoreTransaction,
    tier: Tier,
    id: NodeId,
    page_size: usize,
) -> StoreResult<Vec<Node>> {
    let page_size = page_size.max(1);
    let mut nodes = Vec::new();
    let mut after = None;

    loop {
        let page = tx
            .find_by_ancestor_slot(tier, id, after, page_size)
            .await?;
        let done = page.len() < page_size;
        after = page.last().map(|node| node.id);
        nodes.extend(page);
        if done || after.is_none() {
            break;
        }
    }

    Ok(nodes)
}
