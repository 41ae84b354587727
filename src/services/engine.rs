//! HierarchyEngine: the public face of the hierarchy services.
//!
//! Each operation runs as one atomic unit: acquire subtree locks, open a
//! store transaction, validate, stage writes, pass the chain gate, commit.
//! Any error rolls the transaction back, so callers either see the whole
//! effect or none of it.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::attachment::{Attachment, AttachmentService};
use super::audit::{audit_subtree, Violation};
use super::deactivation::{Deactivation, DeactivationCascade};
use super::gate::ChainGate;
use super::locks::{LockKeys, SubtreeGuard, SubtreeLocks};
use super::promotion::{Promotion, PromotionTransform};
use super::reassignment::{Exchange, Reassignment, ReassignmentEngine};
use super::resolver::AssignmentResolver;
use crate::config::EngineConfig;
use crate::error::{HierarchyError, Result};
use crate::hierarchy::{Node, NodeDraft, NodeId, Tier};
use crate::store::{AttributionRebinder, EntityStore, StoreTransaction};

/// Outcomes that know which nodes they wrote.
trait Staged {
    fn written(&self) -> &[NodeId];
}

impl Staged for Attachment {
    fn written(&self) -> &[NodeId] {
        &self.written
    }
}

impl Staged for Reassignment {
    fn written(&self) -> &[NodeId] {
        &self.written
    }
}

impl Staged for Exchange {
    fn written(&self) -> &[NodeId] {
        &self.written
    }
}

impl Staged for Deactivation {
    fn written(&self) -> &[NodeId] {
        &self.written
    }
}

impl Staged for Promotion {
    fn written(&self) -> &[NodeId] {
        &self.written
    }
}

pub struct HierarchyEngine {
    store: Arc<dyn EntityStore>,
    config: EngineConfig,
    locks: SubtreeLocks,
    gate: ChainGate,
    attachment: AttachmentService,
    reassignment: ReassignmentEngine,
    deactivation: DeactivationCascade,
    promotion: PromotionTransform,
}

impl HierarchyEngine {
    pub fn new(
        store: Arc<dyn EntityStore>,
        rebinder: Arc<dyn AttributionRebinder>,
        config: EngineConfig,
    ) -> Self {
        let resolver = AssignmentResolver::new(config.scan_page_size);
        let deactivation = DeactivationCascade::new(config.scan_page_size);
        let locks = if config.subtree_locking {
            SubtreeLocks::new(config.lock_timeout())
        } else {
            SubtreeLocks::disabled()
        };

        Self {
            store,
            locks,
            gate: ChainGate::new(config.verify_before_commit),
            attachment: AttachmentService::new(resolver),
            reassignment: ReassignmentEngine::new(
                resolver,
                config.exchange_policy,
                config.scan_page_size,
            ),
            deactivation,
            promotion: PromotionTransform::new(resolver, deactivation, rebinder),
            config,
        }
    }

    /// Engine configured from the environment.
    pub fn from_env(store: Arc<dyn EntityStore>, rebinder: Arc<dyn AttributionRebinder>) -> Self {
        Self::new(store, rebinder, EngineConfig::from_env())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Read one node.
    pub async fn get(&self, id: NodeId) -> Result<Node> {
        let mut tx = self.store.begin().await?;
        let node = tx.get(id).await;
        rollback_quietly(tx).await;
        node?.ok_or(HierarchyError::NotFound(id))
    }

    /// Create a node beneath `leader` (a Church takes none).
    #[instrument(skip(self, draft), fields(tier = %draft.tier))]
    pub async fn attach(&self, draft: NodeDraft, leader: Option<NodeId>) -> Result<Node> {
        let _guard = self.lock(leader.into_iter().collect()).await?;
        let mut tx = self.store.begin().await?;
        let staged = self.attachment.attach(tx.as_mut(), draft, leader, Utc::now()).await;
        self.finish(tx, staged).await.map(|attached| attached.node)
    }

    /// Replace the direct leader of `node_id` within its current upper branch.
    #[instrument(skip(self))]
    pub async fn repoint(&self, node_id: NodeId, new_leader_id: NodeId) -> Result<Reassignment> {
        let _guard = self.lock(LockKeys::from_slice(&[node_id, new_leader_id])).await?;
        let mut tx = self.store.begin().await?;
        let staged = self
            .reassignment
            .repoint(tx.as_mut(), node_id, new_leader_id, Utc::now())
            .await;
        self.finish(tx, staged).await
    }

    /// Move `node_id` and its subtree under `new_leader_id`, in any branch.
    #[instrument(skip(self))]
    pub async fn transfer(&self, node_id: NodeId, new_leader_id: NodeId) -> Result<Reassignment> {
        let _guard = self.lock(LockKeys::from_slice(&[node_id, new_leader_id])).await?;
        let mut tx = self.store.begin().await?;
        let staged = self
            .reassignment
            .transfer(tx.as_mut(), node_id, new_leader_id, Utc::now())
            .await;
        self.finish(tx, staged).await
    }

    /// Swap the direct leaders of two same-tier nodes.
    #[instrument(skip(self))]
    pub async fn exchange(&self, first_id: NodeId, second_id: NodeId) -> Result<Exchange> {
        let _guard = self.lock(LockKeys::from_slice(&[first_id, second_id])).await?;
        let mut tx = self.store.begin().await?;
        let staged = self
            .reassignment
            .exchange(tx.as_mut(), first_id, second_id, Utc::now())
            .await;
        self.finish(tx, staged).await
    }

    /// Retire `node_id`, orphaning (not retiring) its dependents.
    #[instrument(skip(self))]
    pub async fn deactivate(&self, node_id: NodeId, reason: &str) -> Result<Deactivation> {
        let _guard = self.lock(LockKeys::from_slice(&[node_id])).await?;
        let mut tx = self.store.begin().await?;
        let staged = self
            .deactivation
            .deactivate(tx.as_mut(), node_id, reason, Utc::now())
            .await;
        self.finish(tx, staged).await
    }

    /// Promote `node_id` one rung up the ladder under `upper_leader_id`.
    ///
    /// A failed commit moves rebound offering records back to `node_id`; if
    /// that also fails the error is `AttributionStranded`, never retryable.
    #[instrument(skip(self))]
    pub async fn promote(
        &self,
        node_id: NodeId,
        target_tier: Tier,
        upper_leader_id: NodeId,
    ) -> Result<Promotion> {
        let _guard = self
            .lock(LockKeys::from_slice(&[node_id, upper_leader_id]))
            .await?;
        let mut tx = self.store.begin().await?;
        let staged = self
            .promotion
            .promote(tx.as_mut(), node_id, target_tier, upper_leader_id, Utc::now())
            .await;
        let rebound = staged
            .as_ref()
            .ok()
            .map(|promotion| (promotion.promoted.id, promotion.retired.id));

        let result = self.finish(tx, staged).await;
        if let (Err(_), Some((promoted, retired))) = (&result, rebound) {
            self.promotion.compensate(promoted, retired).await?;
        }
        result
    }

    /// Invariant sweep over `root_id` and its subtree.
    pub async fn audit(&self, root_id: NodeId) -> Result<Vec<Violation>> {
        let mut tx = self.store.begin().await?;
        let violations = audit_subtree(tx.as_mut(), root_id, self.config.scan_page_size).await;
        rollback_quietly(tx).await;
        violations
    }

    /// Lock the given nodes together with their current ancestor chains.
    ///
    /// Two operations touch overlapping subtrees only when one subject sits in
    /// the other's chain, so locking chains serializes exactly those.
    async fn lock(&self, subjects: LockKeys) -> Result<SubtreeGuard> {
        if !self.locks.is_enabled() {
            return self.locks.acquire(subjects).await;
        }

        let mut keys = subjects.clone();
        let mut tx = self.store.begin().await?;
        for id in subjects {
            match tx.get(id).await {
                Ok(Some(node)) => keys.extend(node.ancestors.iter().map(|(_, ancestor)| ancestor)),
                Ok(None) => {}
                Err(e) => {
                    rollback_quietly(tx).await;
                    return Err(e.into());
                }
            }
        }
        rollback_quietly(tx).await;

        self.locks.acquire(keys).await
    }

    /// Gate, then commit or roll back.
    async fn finish<T: Staged>(
        &self,
        mut tx: Box<dyn StoreTransaction>,
        staged: Result<T>,
    ) -> Result<T> {
        let staged = match staged {
            Ok(outcome) => {
                let verified = self.gate.verify(tx.as_mut(), outcome.written()).await;
                verified.map(|()| outcome)
            }
            Err(e) => Err(e),
        };

        match staged {
            Ok(outcome) => {
                let written = outcome.written().len();
                tx.commit().await.map_err(|e| {
                    warn!("Commit failed: {}", e);
                    HierarchyError::from(e)
                })?;
                info!("Committed {} node write(s)", written);
                Ok(outcome)
            }
            Err(e) => {
                warn!("Rolling back: {}", e);
                rollback_quietly(tx).await;
                Err(e)
            }
        }
    }
}

async fn rollback_quietly(tx: Box<dyn StoreTransaction>) {
    if let Err(e) = tx.rollback().await {
        warn!("Rollback failed: {}", e);
    }
}
