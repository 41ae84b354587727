//! In-memory store and ledger
//!
//! Transactions are serialized: `begin` holds the store lock until the
//! transaction commits or is dropped, so concurrent operations never observe
//! each other's intermediate states.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use super::{AttributionRebinder, EntityStore, StoreResult, StoreTransaction};
use crate::error::StoreError;
use crate::hierarchy::{Node, NodeId, Tier};

/// Secondary index a scan walks.
#[derive(Debug, Clone, Copy)]
enum Index {
    /// Nodes whose `Tier` slot holds the id.
    Slot(Tier, NodeId),
    /// Nodes whose direct leader is the id.
    Leader(NodeId),
}

/// Nodes keyed by id, with id-ordered secondary indexes.
#[derive(Debug, Default)]
struct Graph {
    nodes: BTreeMap<NodeId, Node>,
    by_slot: HashMap<(Tier, NodeId), BTreeSet<NodeId>>,
    by_leader: HashMap<NodeId, BTreeSet<NodeId>>,
}

impl Graph {
    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    fn get(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    fn insert(&mut self, node: Node) {
        if let Some(previous) = self.nodes.remove(&node.id) {
            self.unindex(&previous);
        }
        for key in node.ancestors.iter() {
            self.by_slot.entry(key).or_default().insert(node.id);
        }
        if let Some(leader) = node.direct_leader() {
            self.by_leader.entry(leader).or_default().insert(node.id);
        }
        self.nodes.insert(node.id, node);
    }

    fn unindex(&mut self, node: &Node) {
        for key in node.ancestors.iter() {
            if let Entry::Occupied(mut ids) = self.by_slot.entry(key) {
                ids.get_mut().remove(&node.id);
                if ids.get().is_empty() {
                    ids.remove();
                }
            }
        }
        if let Some(leader) = node.direct_leader() {
            if let Entry::Occupied(mut ids) = self.by_leader.entry(leader) {
                ids.get_mut().remove(&node.id);
                if ids.get().is_empty() {
                    ids.remove();
                }
            }
        }
    }

    /// Ids under `index`, ascending and strictly after `after`.
    fn ids(&self, index: Index, after: Option<NodeId>) -> impl Iterator<Item = NodeId> + '_ {
        let ids = match index {
            Index::Slot(tier, id) => self.by_slot.get(&(tier, id)),
            Index::Leader(id) => self.by_leader.get(&id),
        };
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        ids.into_iter().flat_map(move |ids| ids.range((lower, Bound::Unbounded)).copied())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    graph: Arc<Mutex<Graph>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed state, ordered by node id.
    pub async fn snapshot(&self) -> Vec<Node> {
        self.graph.lock().await.nodes.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.graph.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.graph.lock().await.nodes.is_empty()
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let guard = Arc::clone(&self.graph).lock_owned().await;
        Ok(Box::new(MemoryTransaction {
            committed: guard,
            staged: Graph::default(),
        }))
    }
}

struct MemoryTransaction {
    committed: OwnedMutexGuard<Graph>,
    staged: Graph,
}

impl MemoryTransaction {
    fn visible(&self, id: &NodeId) -> Option<&Node> {
        self.staged.get(id).or_else(|| self.committed.get(id))
    }

    /// Nodes under `index` as this transaction sees them, ordered by id.
    ///
    /// Merges the committed and staged index ranges; a staged write hides
    /// the committed version of the same node.
    fn scan(&self, index: Index, after: Option<NodeId>) -> impl Iterator<Item = &Node> + '_ {
        let committed: &Graph = &self.committed;
        let staged = &self.staged;
        let mut base = committed
            .ids(index, after)
            .filter(move |id| !staged.contains(id))
            .filter_map(move |id| committed.get(&id))
            .peekable();
        let mut overlay = staged
            .ids(index, after)
            .filter_map(move |id| staged.get(&id))
            .peekable();

        std::iter::from_fn(move || match (base.peek(), overlay.peek()) {
            (Some(b), Some(o)) if b.id < o.id => base.next(),
            (Some(_), None) => base.next(),
            _ => overlay.next(),
        })
    }

    fn uniqueness_conflict(&self, node: &Node) -> Option<StoreError> {
        if !node.tier.is_unique_per_leader() || !node.is_active() {
            return None;
        }
        let leader = node.direct_leader()?;
        self.scan(Index::Leader(leader), None)
            .find(|other| other.id != node.id && other.tier == node.tier && other.is_active())
            .map(|existing| StoreError::Conflict {
                leader,
                tier: node.tier,
                existing: existing.id,
            })
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn get(&mut self, id: NodeId) -> StoreResult<Option<Node>> {
        Ok(self.visible(&id).cloned())
    }

    async fn find_by_ancestor_slot(
        &mut self,
        tier: Tier,
        id: NodeId,
        after: Option<NodeId>,
        limit: usize,
    ) -> StoreResult<Vec<Node>> {
        Ok(self
            .scan(Index::Slot(tier, id), after)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find_subordinates(
        &mut self,
        leader_tier: Tier,
        leader: NodeId,
        after: Option<NodeId>,
        limit: usize,
    ) -> StoreResult<Vec<Node>> {
        Ok(self
            .scan(Index::Leader(leader), after)
            .filter(|node| node.leader_tier() == Some(leader_tier))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn upsert(&mut self, node: &Node) -> StoreResult<()> {
        if let Some(conflict) = self.uniqueness_conflict(node) {
            return Err(conflict);
        }
        self.staged.insert(node.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTransaction {
            mut committed,
            staged,
        } = *self;
        debug!("Committing {} staged node(s)", staged.len());
        for node in staged.nodes.into_values() {
            committed.insert(node);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        debug!("Discarding {} staged node(s)", self.staged.len());
        Ok(())
    }
}

/// A financial record attributed to a hierarchy node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionRecord {
    pub record_id: Uuid,
    pub contributor: NodeId,
    pub memo: String,
}

/// In-memory attribution ledger.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    records: Arc<Mutex<Vec<AttributionRecord>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, contributor: NodeId, memo: impl Into<String>) -> Uuid {
        let record_id = Uuid::new_v4();
        self.records.lock().await.push(AttributionRecord {
            record_id,
            contributor,
            memo: memo.into(),
        });
        record_id
    }

    pub async fn records_for(&self, contributor: NodeId) -> Vec<AttributionRecord> {
        self.records
            .lock()
            .await
            .iter()
            .filter(|record| record.contributor == contributor)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AttributionRebinder for MemoryLedger {
    async fn rebind_contributor(&self, old: NodeId, new: NodeId) -> StoreResult<u64> {
        let mut records = self.records.lock().await;
        let mut updated = 0;
        for record in records.iter_mut().filter(|record| record.contributor == old) {
            record.contributor = new;
            updated += 1;
        }
        Ok(updated)
    }
}
