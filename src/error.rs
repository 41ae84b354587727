//! Error handling for the hierarchy engine
//!
//! `HierarchyError` is what every public operation returns. Collaborators
//! (stores, attribution rebinders) report `StoreError`, which is folded into
//! `HierarchyError` at the service boundary.

use thiserror::Error;

use crate::hierarchy::{NodeId, Tier};

pub type Result<T> = std::result::Result<T, HierarchyError>;

/// Main error type for hierarchy operations
#[derive(Error, Debug)]
pub enum HierarchyError {
    #[error("node {0} not found")]
    NotFound(NodeId),

    #[error("leader {id} is inactive")]
    InactiveLeader { id: NodeId },

    #[error("node {0} is inactive")]
    InactiveNode(NodeId),

    #[error("node {id} is a {actual}, expected a {expected}")]
    TierMismatch {
        id: NodeId,
        expected: Tier,
        actual: Tier,
    },

    #[error("node {id} has no active {missing} in its ancestor chain")]
    IncompleteChain { id: NodeId, missing: Tier },

    #[error("ancestor chain of {id} is broken at {tier}")]
    ChainBroken { id: NodeId, tier: Tier },

    #[error("moving {node} under {candidate} would cross into another branch at {tier}")]
    BranchMismatch {
        node: NodeId,
        candidate: NodeId,
        tier: Tier,
    },

    #[error("leader {leader} already has an active {tier} ({existing})")]
    UniquenessConflict {
        leader: NodeId,
        tier: Tier,
        existing: NodeId,
    },

    #[error("node {id} cannot be promoted from {from} to {to}")]
    InvalidPromotion { id: NodeId, from: Tier, to: Tier },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("operation aborted: {0}")]
    Aborted(String),

    /// Promotion failed and its offering records could not be moved back.
    /// They remain attributed to `promoted`, which was never committed.
    #[error(
        "offering records of {retired} are stranded on uncommitted node {promoted}: {reason}"
    )]
    AttributionStranded {
        retired: NodeId,
        promoted: NodeId,
        reason: String,
    },
}

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InactiveLeader,
    InactiveNode,
    TierMismatch,
    IncompleteChain,
    ChainBroken,
    BranchMismatch,
    UniquenessConflict,
    InvalidPromotion,
    InvalidRequest,
    Aborted,
    AttributionStranded,
}

impl HierarchyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InactiveLeader { .. } => ErrorKind::InactiveLeader,
            Self::InactiveNode(_) => ErrorKind::InactiveNode,
            Self::TierMismatch { .. } => ErrorKind::TierMismatch,
            Self::IncompleteChain { .. } => ErrorKind::IncompleteChain,
            Self::ChainBroken { .. } => ErrorKind::ChainBroken,
            Self::BranchMismatch { .. } => ErrorKind::BranchMismatch,
            Self::UniquenessConflict { .. } => ErrorKind::UniquenessConflict,
            Self::InvalidPromotion { .. } => ErrorKind::InvalidPromotion,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Aborted(_) => ErrorKind::Aborted,
            Self::AttributionStranded { .. } => ErrorKind::AttributionStranded,
        }
    }

    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::NotFound => 404,
            ErrorKind::UniquenessConflict | ErrorKind::BranchMismatch => 409,
            ErrorKind::InvalidRequest => 400,
            ErrorKind::Aborted => 503,
            ErrorKind::AttributionStranded => 500,
            ErrorKind::InactiveLeader
            | ErrorKind::InactiveNode
            | ErrorKind::TierMismatch
            | ErrorKind::IncompleteChain
            | ErrorKind::ChainBroken
            | ErrorKind::InvalidPromotion => 422,
        }
    }

    /// Only `Aborted` may succeed on a plain retry. `AttributionStranded`
    /// needs the records moved back by hand first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }
}

/// Errors reported by the entity store and attribution collaborators
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("leader {leader} already has an active {tier} ({existing})")]
    Conflict {
        leader: NodeId,
        tier: Tier,
        existing: NodeId,
    },

    #[error("transaction aborted: {0}")]
    Aborted(String),

    #[error("store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl From<StoreError> for HierarchyError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Conflict {
                leader,
                tier,
                existing,
            } => HierarchyError::UniquenessConflict {
                leader,
                tier,
                existing,
            },
            StoreError::Aborted(message) => HierarchyError::Aborted(message),
            StoreError::Backend(e) => HierarchyError::Aborted(format!("{:#}", e)),
        }
    }
}
