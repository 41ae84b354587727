//! Shared fixtures for the hierarchy integration tests.
//!
//! `Fixture` wires a `HierarchyEngine` over the in-memory store and ledger
//! (through `FlakyStore` and `FlakyLedger`) and builds church trees through
//! the public `attach` operation.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use ministry_hierarchy::error::StoreError;
use ministry_hierarchy::services::audit_nodes;
use ministry_hierarchy::store::StoreResult;
use ministry_hierarchy::{
    AttributionRebinder, EngineConfig, EntityStore, HierarchyEngine, MemoryLedger, MemoryStore,
    Node, NodeDraft, NodeId, StoreTransaction, Tier,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// One node per tier, each leading the next.
#[derive(Debug, Clone)]
pub struct Branch {
    pub church: Node,
    pub pastor: Node,
    pub copastor: Node,
    pub supervisor: Node,
    pub zone: Node,
    pub preacher: Node,
    pub family_group: Node,
    pub disciple: Node,
}

pub struct Fixture {
    pub engine: HierarchyEngine,
    pub store: MemoryStore,
    pub ledger: MemoryLedger,
    pub faults: Arc<Faults>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        init_tracing();
        let store = MemoryStore::new();
        let ledger = MemoryLedger::new();
        let faults = Arc::new(Faults::default());
        let flaky = FlakyStore::new(store.clone(), Arc::clone(&faults));
        let rebinder = FlakyLedger::new(ledger.clone(), Arc::clone(&faults));
        let engine = HierarchyEngine::new(Arc::new(flaky), Arc::new(rebinder), config);
        Self {
            engine,
            store,
            ledger,
            faults,
        }
    }

    /// Engine whose rebinder fails every call.
    pub fn with_broken_ledger() -> Self {
        init_tracing();
        let store = MemoryStore::new();
        let faults = Arc::new(Faults::default());
        let flaky = FlakyStore::new(store.clone(), Arc::clone(&faults));
        let engine = HierarchyEngine::new(
            Arc::new(flaky),
            Arc::new(BrokenLedger),
            EngineConfig::default(),
        );
        Self {
            engine,
            store,
            ledger: MemoryLedger::new(),
            faults,
        }
    }

    pub async fn add(&self, tier: Tier, leader: Option<&Node>) -> Node {
        self.engine
            .attach(
                NodeDraft::new(tier, json!({ "name": format!("{} {}", tier, NodeId::new()) })),
                leader.map(|leader| leader.id),
            )
            .await
            .unwrap_or_else(|e| panic!("attach {}: {}", tier, e))
    }

    /// A fresh church with one node at every tier below it.
    pub async fn branch(&self) -> Branch {
        let church = self.add(Tier::Church, None).await;
        self.branch_under(church).await
    }

    /// A full chain below an existing church.
    pub async fn branch_under(&self, church: Node) -> Branch {
        let pastor = self.add(Tier::Pastor, Some(&church)).await;
        let copastor = self.add(Tier::Copastor, Some(&pastor)).await;
        let supervisor = self.add(Tier::Supervisor, Some(&copastor)).await;
        let zone = self.add(Tier::Zone, Some(&supervisor)).await;
        let preacher = self.add(Tier::Preacher, Some(&zone)).await;
        let family_group = self.add(Tier::FamilyGroup, Some(&preacher)).await;
        let disciple = self.add(Tier::Disciple, Some(&family_group)).await;
        Branch {
            church,
            pastor,
            copastor,
            supervisor,
            zone,
            preacher,
            family_group,
            disciple,
        }
    }

    pub async fn node(&self, id: NodeId) -> Node {
        self.engine
            .get(id)
            .await
            .unwrap_or_else(|e| panic!("get {}: {}", id, e))
    }

    pub async fn snapshot(&self) -> Vec<Node> {
        self.store.snapshot().await
    }

    /// Panic with the violation list unless the committed graph is clean.
    pub async fn assert_consistent(&self) {
        let violations = audit_nodes(&self.snapshot().await);
        assert!(violations.is_empty(), "graph violations: {:#?}", violations);
    }
}

/// Switches for `FlakyStore` and `FlakyLedger`, flipped by tests after the
/// fixture is built.
#[derive(Debug, Default)]
pub struct Faults {
    /// Fail the n-th upsert (1-based) within a transaction; 0 disables.
    fail_upsert_at: AtomicUsize,
    fail_commit: AtomicBool,
    /// Fail the n-th rebind (1-based) since it was armed; 0 disables.
    fail_rebind_at: AtomicUsize,
    rebinds: AtomicUsize,
}

impl Faults {
    pub fn fail_upsert_at(&self, n: usize) {
        self.fail_upsert_at.store(n, Ordering::SeqCst);
    }

    pub fn fail_commit(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }

    pub fn fail_rebind_at(&self, n: usize) {
        self.rebinds.store(0, Ordering::SeqCst);
        self.fail_rebind_at.store(n, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.fail_upsert_at(0);
        self.fail_commit(false);
        self.fail_rebind_at(0);
    }
}

/// Store wrapper that injects failures into otherwise healthy transactions.
pub struct FlakyStore {
    inner: MemoryStore,
    faults: Arc<Faults>,
}

impl FlakyStore {
    pub fn new(inner: MemoryStore, faults: Arc<Faults>) -> Self {
        Self { inner, faults }
    }
}

#[async_trait]
impl EntityStore for FlakyStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        Ok(Box::new(FlakyTransaction {
            inner: self.inner.begin().await?,
            faults: Arc::clone(&self.faults),
            upserts: 0,
        }))
    }
}

struct FlakyTransaction {
    inner: Box<dyn StoreTransaction>,
    faults: Arc<Faults>,
    upserts: usize,
}

#[async_trait]
impl StoreTransaction for FlakyTransaction {
    async fn get(&mut self, id: NodeId) -> StoreResult<Option<Node>> {
        self.inner.get(id).await
    }

    async fn find_by_ancestor_slot(
        &mut self,
        tier: Tier,
        id: NodeId,
        after: Option<NodeId>,
        limit: usize,
    ) -> StoreResult<Vec<Node>> {
        self.inner.find_by_ancestor_slot(tier, id, after, limit).await
    }

    async fn find_subordinates(
        &mut self,
        leader_tier: Tier,
        leader: NodeId,
        after: Option<NodeId>,
        limit: usize,
    ) -> StoreResult<Vec<Node>> {
        self.inner
            .find_subordinates(leader_tier, leader, after, limit)
            .await
    }

    async fn upsert(&mut self, node: &Node) -> StoreResult<()> {
        self.upserts += 1;
        if self.upserts == self.faults.fail_upsert_at.load(Ordering::SeqCst) {
            return Err(StoreError::Aborted(format!(
                "injected failure on write #{}",
                self.upserts
            )));
        }
        self.inner.upsert(node).await
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let FlakyTransaction { inner, faults, .. } = *self;
        if faults.fail_commit.load(Ordering::SeqCst) {
            inner.rollback().await?;
            return Err(StoreError::Aborted("injected commit failure".to_string()));
        }
        inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        let FlakyTransaction { inner, .. } = *self;
        inner.rollback().await
    }
}

/// Ledger wrapper that fails the rebind call `Faults` points at.
pub struct FlakyLedger {
    inner: MemoryLedger,
    faults: Arc<Faults>,
}

impl FlakyLedger {
    pub fn new(inner: MemoryLedger, faults: Arc<Faults>) -> Self {
        Self { inner, faults }
    }
}

#[async_trait]
impl AttributionRebinder for FlakyLedger {
    async fn rebind_contributor(&self, old: NodeId, new: NodeId) -> StoreResult<u64> {
        let call = self.faults.rebinds.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.faults.fail_rebind_at.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "injected ledger failure on rebind #{}",
                call
            )));
        }
        self.inner.rebind_contributor(old, new).await
    }
}

/// Rebinder whose backend is always down.
pub struct BrokenLedger;

#[async_trait]
impl AttributionRebinder for BrokenLedger {
    async fn rebind_contributor(&self, _old: NodeId, _new: NodeId) -> StoreResult<u64> {
        Err(StoreError::Backend(anyhow::anyhow!("ledger unavailable")))
    }
}
