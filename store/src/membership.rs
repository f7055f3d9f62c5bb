//! Membership table: the authoritative list of shards and their status.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use shardkv_common::{Result, ShardId, ShardKvError};

use crate::partition::{HashPartitioner, Partitioner};
use crate::shard::{Shard, ShardInfo};

/// Ordered shard list with a capacity bound and a partition function.
///
/// Shards are only ever appended; `remove_node` deactivates in place so that
/// ids stay dense and equal to their index.
pub struct MembershipTable {
    /// Shards indexed by ID.
    shards: RwLock<Vec<Arc<Shard>>>,
    /// Upper bound on the number of shards ever created.
    max_shards: usize,
    /// Key to shard index mapping.
    partitioner: Arc<dyn Partitioner>,
}

impl MembershipTable {
    /// Create an empty table using the default hash partitioner.
    pub fn new(max_shards: usize) -> Self {
        Self::with_partitioner(max_shards, Arc::new(HashPartitioner))
    }

    /// Create an empty table with a custom partition function.
    pub fn with_partitioner(max_shards: usize, partitioner: Arc<dyn Partitioner>) -> Self {
        Self {
            shards: RwLock::new(Vec::with_capacity(max_shards)),
            max_shards,
            partitioner,
        }
    }

    /// Append a new active shard with the next sequential ID.
    pub fn add_node(&self) -> Result<ShardId> {
        let mut shards = self.shards.write();

        if shards.len() >= self.max_shards {
            warn!(
                max_shards = self.max_shards,
                "Cannot add shard, capacity reached"
            );
            return Err(ShardKvError::CapacityExceeded {
                max_shards: self.max_shards,
            });
        }

        let shard_id = ShardId::new(shards.len());
        shards.push(Arc::new(Shard::new(shard_id)));

        info!(shard_id = %shard_id, shard_count = shards.len(), "Shard added");
        Ok(shard_id)
    }

    /// Deactivate a shard, returning whether it was active before.
    ///
    /// Removing an already inactive shard succeeds. Takes a raw signed ID as
    /// supplied by remote callers; anything outside `[0, len)` is rejected.
    pub fn remove_node(&self, shard_id: i64) -> Result<bool> {
        let shards = self.shards.read();

        let shard = usize::try_from(shard_id)
            .ok()
            .and_then(|index| shards.get(index))
            .ok_or_else(|| {
                warn!(shard_id, shard_count = shards.len(), "Invalid shard id");
                ShardKvError::InvalidShardId {
                    shard_id,
                    shard_count: shards.len(),
                }
            })?;

        let deactivated = shard.deactivate();
        if deactivated {
            info!(shard_id = %shard.id(), "Shard deactivated");
        }
        Ok(deactivated)
    }

    /// Compute the owning shard for `key` under the current shard count.
    pub fn route(&self, key: &str) -> Result<ShardId> {
        let shards = self.shards.read();
        self.route_in(&shards, key)
    }

    /// Route `key` and return the owning shard under a single read lock.
    pub fn resolve(&self, key: &str) -> Result<Arc<Shard>> {
        let shards = self.shards.read();
        let shard_id = self.route_in(&shards, key)?;
        Ok(shards[shard_id.index()].clone())
    }

    /// Get a shard by ID.
    pub fn shard(&self, shard_id: ShardId) -> Option<Arc<Shard>> {
        self.shards.read().get(shard_id.index()).cloned()
    }

    /// Number of shards ever created (active or not).
    pub fn len(&self) -> usize {
        self.shards.read().len()
    }

    /// Check if no shard has been created yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of shards currently serving traffic.
    pub fn active_count(&self) -> usize {
        self.shards.read().iter().filter(|s| s.is_active()).count()
    }

    /// Capacity bound.
    pub fn max_shards(&self) -> usize {
        self.max_shards
    }

    /// Description of the partition function in use.
    pub fn partitioner(&self) -> String {
        self.partitioner.describe()
    }

    /// Snapshot of every shard.
    pub fn shard_infos(&self) -> Vec<ShardInfo> {
        self.shards.read().iter().map(|s| s.info()).collect()
    }

    fn route_in(&self, shards: &[Arc<Shard>], key: &str) -> Result<ShardId> {
        if shards.is_empty() {
            return Err(ShardKvError::NoShards);
        }
        let index = self.partitioner.partition(key, shards.len());
        debug_assert!(index < shards.len(), "partitioner returned out-of-range index");
        Ok(ShardId::new(index.min(shards.len() - 1)))
    }
}

impl std::fmt::Debug for MembershipTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MembershipTable")
            .field("shards", &self.len())
            .field("max_shards", &self.max_shards)
            .field("partitioner", &self.partitioner.describe())
            .finish()
    }
}
