//! Ordered acquisition of shard locks for transactions.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use shardkv_common::{Result, ShardId, ShardKvError};
use shardkv_store::{Shard, ShardGuard};

use crate::config::LockConfig;
use crate::metrics::SharedMetrics;

/// Locks held by one transaction, keyed by shard.
///
/// Every guard is released when the set is dropped, on every exit path.
#[derive(Debug)]
pub struct LockSet<'a> {
    guards: BTreeMap<ShardId, ShardGuard<'a>>,
}

impl<'a> LockSet<'a> {
    /// Guard for a locked shard.
    pub fn guard(&self, shard_id: ShardId) -> Option<&ShardGuard<'a>> {
        self.guards.get(&shard_id)
    }

    /// Mutable guard for a locked shard.
    pub fn guard_mut(&mut self, shard_id: ShardId) -> Option<&mut ShardGuard<'a>> {
        self.guards.get_mut(&shard_id)
    }

    /// Locked shard IDs in acquisition order.
    pub fn shard_ids(&self) -> Vec<ShardId> {
        self.guards.keys().copied().collect()
    }

    /// Number of shards locked.
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    /// Check if no shard is locked.
    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    /// Release every lock now.
    pub fn release(self) {
        debug!(shards = ?self.shard_ids(), "Releasing shard locks");
    }
}

/// Acquires shard locks in ascending shard-id order.
///
/// A single total order across all transactions rules out circular waits.
/// Each distinct shard is locked exactly once per transaction.
pub struct LockManager {
    config: LockConfig,
    metrics: SharedMetrics,
}

impl LockManager {
    /// Create a new lock manager.
    pub fn new(config: LockConfig, metrics: SharedMetrics) -> Self {
        Self { config, metrics }
    }

    /// Lock every distinct shard in `shards`.
    ///
    /// On timeout the locks already taken are dropped before returning.
    pub fn acquire<'a>(&self, shards: &'a [Arc<Shard>]) -> Result<LockSet<'a>> {
        let mut ordered: Vec<&'a Shard> = shards.iter().map(|s| s.as_ref()).collect();
        ordered.sort_by_key(|s| s.id());
        ordered.dedup_by_key(|s| s.id());

        let mut guards = BTreeMap::new();
        for shard in ordered {
            match shard.lock(self.config.acquisition_timeout) {
                Ok(guard) => {
                    guards.insert(shard.id(), guard);
                }
                Err(e) => {
                    if matches!(e, ShardKvError::LockTimeout { .. }) {
                        self.metrics.lock_timeout();
                    }
                    warn!(
                        shard_id = %shard.id(),
                        held = guards.len(),
                        error = %e,
                        "Shard lock acquisition failed"
                    );
                    return Err(e);
                }
            }
        }

        debug!(shards = guards.len(), "Shard locks acquired");
        Ok(LockSet { guards })
    }

    /// Configured acquisition timeout.
    pub fn config(&self) -> &LockConfig {
        &self.config
    }
}
