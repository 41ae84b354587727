//! Engine configuration
//!
//! Read from the environment (a `.env` file is honoured), falling back to
//! defaults for anything unset or unparsable.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Whether `exchange` may swap leaders that sit in different upper branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangePolicy {
    CrossBranch,
    SameBranch,
}

impl std::str::FromStr for ExchangePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cross_branch" | "cross-branch" => Ok(ExchangePolicy::CrossBranch),
            "same_branch" | "same-branch" => Ok(ExchangePolicy::SameBranch),
            other => Err(format!("unknown exchange policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub exchange_policy: ExchangePolicy,
    /// Serialize operations on overlapping subtrees in-process.
    pub subtree_locking: bool,
    pub lock_timeout_ms: u64,
    /// Page size for ancestor-slot scans.
    pub scan_page_size: usize,
    /// Re-run the chain check on every written node before commit.
    pub verify_before_commit: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            exchange_policy: ExchangePolicy::CrossBranch,
            subtree_locking: true,
            lock_timeout_ms: 5_000,
            scan_page_size: 500,
            verify_before_commit: true,
        }
    }
}

impl EngineConfig {
    /// Build from `HIERARCHY_*` environment variables.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        Self {
            exchange_policy: env_parse("HIERARCHY_EXCHANGE_POLICY")
                .unwrap_or(defaults.exchange_policy),
            subtree_locking: env_parse("HIERARCHY_SUBTREE_LOCKING")
                .unwrap_or(defaults.subtree_locking),
            lock_timeout_ms: env_parse("HIERARCHY_LOCK_TIMEOUT_MS")
                .unwrap_or(defaults.lock_timeout_ms),
            scan_page_size: env_parse::<usize>("HIERARCHY_SCAN_PAGE_SIZE")
                .filter(|size| *size > 0)
                .unwrap_or(defaults.scan_page_size),
            verify_before_commit: env_parse("HIERARCHY_VERIFY_BEFORE_COMMIT")
                .unwrap_or(defaults.verify_before_commit),
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn with_exchange_policy(mut self, policy: ExchangePolicy) -> Self {
        self.exchange_policy = policy;
        self
    }

    pub fn with_scan_page_size(mut self, size: usize) -> Self {
        self.scan_page_size = size.max(1);
        self
    }
}

fn env_parse<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring {}={}: {}", key, raw, e);
            None
        }
    }
}
