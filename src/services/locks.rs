//! In-process subtree locks
//!
//! One async mutex per node id. Keys are sorted and deduplicated before
//! acquisition so two operations can never wait on each other in opposite
//! order, and acquisition is bounded by a timeout.

use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::error::{HierarchyError, Result};
use crate::hierarchy::NodeId;

pub type LockKeys = SmallVec<[NodeId; 8]>;

#[derive(Debug)]
pub struct SubtreeLocks {
    table: Mutex<HashMap<NodeId, Arc<AsyncMutex<()>>>>,
    timeout: Duration,
    enabled: bool,
}

/// Held locks; released on drop.
#[derive(Debug)]
pub struct SubtreeGuard {
    keys: LockKeys,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl SubtreeGuard {
    pub fn keys(&self) -> &[NodeId] {
        &self.keys
    }
}

impl SubtreeLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            timeout,
            enabled: true,
        }
    }

    /// A lock table that hands out empty guards.
    pub fn disabled() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            timeout: Duration::ZERO,
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn acquire(&self, keys: impl IntoIterator<Item = NodeId>) -> Result<SubtreeGuard> {
        if !self.enabled {
            return Ok(SubtreeGuard {
                keys: LockKeys::new(),
                _guards: Vec::new(),
            });
        }

        let mut keys: LockKeys = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let mutexes: Vec<Arc<AsyncMutex<()>>> = {
            let mut table = self.table.lock().unwrap_or_else(|p| p.into_inner());
            // Drop entries nobody holds or waits on.
            table.retain(|_, mutex| Arc::strong_count(mutex) > 1);
            keys.iter()
                .map(|key| Arc::clone(table.entry(*key).or_default()))
                .collect()
        };

        let acquire_all = async move {
            let mut guards = Vec::with_capacity(mutexes.len());
            for mutex in mutexes {
                guards.push(mutex.lock_owned().await);
            }
            guards
        };

        match tokio::time::timeout(self.timeout, acquire_all).await {
            Ok(guards) => {
                debug!("Acquired {} subtree lock(s)", keys.len());
                Ok(SubtreeGuard {
                    keys,
                    _guards: guards,
                })
            }
            Err(_) => {
                warn!(
                    "Timed out after {:?} waiting for subtree locks {:?}",
                    self.timeout, keys
                );
                Err(HierarchyError::Aborted(format!(
                    "subtree lock not acquired within {:?}",
                    self.timeout
                )))
            }
        }
    }
}
