//! Key to shard routing.

use std::sync::Arc;

use shardkv_common::{Result, ShardId, ShardKvError};

use crate::membership::MembershipTable;
use crate::shard::Shard;

/// Stateless façade locating the shard that owns a key.
///
/// There is no failover: a key whose owner is inactive is unavailable until
/// membership changes route it elsewhere.
#[derive(Debug, Clone)]
pub struct Router {
    table: Arc<MembershipTable>,
}

impl Router {
    /// Create a router over a membership table.
    pub fn new(table: Arc<MembershipTable>) -> Self {
        Self { table }
    }

    /// Return the active shard owning `key`.
    pub fn locate(&self, key: &str) -> Result<Arc<Shard>> {
        let shard = self.table.resolve(key)?;
        if !shard.is_active() {
            return Err(ShardKvError::ShardUnavailable(shard.id()));
        }
        Ok(shard)
    }

    /// Return the ID of the shard owning `key`, active or not.
    pub fn route(&self, key: &str) -> Result<ShardId> {
        self.table.route(key)
    }

    /// The membership table consulted by this router.
    pub fn table(&self) -> &Arc<MembershipTable> {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::KeyLengthPartitioner;

    fn router_with(count: usize) -> Router {
        let table = Arc::new(MembershipTable::with_partitioner(
            8,
            Arc::new(KeyLengthPartitioner),
        ));
        for _ in 0..count {
            table.add_node().unwrap();
        }
        Router::new(table)
    }

    #[test]
    fn test_locate_active_shard() {
        let router = router_with(3);
        let shard = router.locate("ab").unwrap();
        assert_eq!(shard.id(), ShardId::new(2));
        assert_eq!(router.route("ab").unwrap(), ShardId::new(2));
    }

    #[test]
    fn test_locate_inactive_shard_is_unavailable() {
        let router = router_with(3);
        router.table().remove_node(2).unwrap();

        assert_eq!(
            router.locate("ab").unwrap_err(),
            ShardKvError::ShardUnavailable(ShardId::new(2))
        );
        // Other shards keep serving.
        assert_eq!(router.locate("a").unwrap().id(), ShardId::new(1));
    }

    #[test]
    fn test_locate_without_shards() {
        let router = router_with(0);
        assert_eq!(router.locate("a").unwrap_err(), ShardKvError::NoShards);
    }

    #[test]
    fn test_clones_share_membership() {
        let router = router_with(1);
        let clone = router.clone();

        router.table().add_node().unwrap();
        assert_eq!(clone.table().len(), 2);
    }
}
