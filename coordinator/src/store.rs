//! Public store facade: membership, single-key access and transfers.

use std::sync::Arc;

use tracing::{info, instrument};

use shardkv_common::{Participant, Result, ShardId, ShardKvError, Transaction};
use shardkv_store::{MembershipTable, Partitioner, Router, Shard, ShardInfo};

use crate::config::StoreConfig;
use crate::coordinator::TransactionCoordinator;
use crate::metrics::{Metrics, MetricsSnapshot, SharedMetrics};

/// A sharded key-value store with atomic cross-shard transfers.
///
/// Every operation may be invoked concurrently from any thread.
pub struct Store {
    config: StoreConfig,
    router: Router,
    coordinator: TransactionCoordinator,
    metrics: SharedMetrics,
}

impl Store {
    /// Create a store with an empty membership table of `max_shards` capacity.
    pub fn create(max_shards: usize) -> Self {
        let config = StoreConfig::with_capacity(max_shards);
        let partitioner = config.partition_strategy.build();
        Self::assemble(config, partitioner)
    }

    /// Create a store from configuration, pre-populating `initial_shards`.
    pub fn with_config(config: StoreConfig) -> Result<Self> {
        let partitioner = config.partition_strategy.build();
        Self::with_partitioner(config, partitioner)
    }

    /// Create a store using a custom partition function.
    ///
    /// `config.partition_strategy` is ignored.
    pub fn with_partitioner(
        config: StoreConfig,
        partitioner: Arc<dyn Partitioner>,
    ) -> Result<Self> {
        config.validate().map_err(ShardKvError::ConfigurationError)?;

        let initial_shards = config.initial_shards;
        let store = Self::assemble(config, partitioner);
        for _ in 0..initial_shards {
            store.add_node()?;
        }

        info!(
            shards = store.router.table().len(),
            max_shards = store.config.max_shards,
            partitioner = %store.router.table().partitioner(),
            "Store initialized"
        );
        Ok(store)
    }

    fn assemble(config: StoreConfig, partitioner: Arc<dyn Partitioner>) -> Self {
        let table = Arc::new(MembershipTable::with_partitioner(
            config.max_shards,
            partitioner,
        ));
        let router = Router::new(table);
        let metrics = Arc::new(Metrics::new());
        let coordinator = TransactionCoordinator::new(
            router.clone(),
            config.lock_config.clone(),
            metrics.clone(),
        );

        Self {
            config,
            router,
            coordinator,
            metrics,
        }
    }

    /// Add a shard, returning its ID.
    pub fn add_node(&self) -> Result<ShardId> {
        let shard_id = self.router.table().add_node()?;
        self.metrics.node_added();
        Ok(shard_id)
    }

    /// Deactivate a shard. Idempotent for valid IDs; returns whether the
    /// shard was active before this call.
    pub fn remove_node(&self, shard_id: i64) -> Result<bool> {
        let deactivated = self.router.table().remove_node(shard_id)?;
        if deactivated {
            self.metrics.node_removed();
        }
        Ok(deactivated)
    }

    /// Read a key. `Ok(None)` when the key is absent.
    ///
    /// Fails with [`ShardKvError::ShardUnavailable`] when the owning shard is
    /// inactive, including when it is deactivated while this call waits for
    /// the shard lock.
    #[instrument(skip(self))]
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let shard = self.router.locate(key)?;
        let guard = self.lock(&shard)?;
        if !guard.is_active() {
            return Err(ShardKvError::ShardUnavailable(shard.id()));
        }
        Ok(guard.get(key).cloned())
    }

    /// Insert or overwrite a key.
    #[instrument(skip(self, value))]
    pub fn put(&self, key: &str, value: impl Into<String>) -> Result<()> {
        let shard = self.router.locate(key)?;
        self.lock(&shard)?.put(key, value)?;
        Ok(())
    }

    /// Remove a key, reporting whether it existed.
    #[instrument(skip(self))]
    pub fn delete(&self, key: &str) -> Result<bool> {
        let shard = self.router.locate(key)?;
        let deleted = self.lock(&shard)?.delete(key)?;
        Ok(deleted)
    }

    /// Atomically move `amount` from `source_key` to `dest_key`.
    pub fn transfer(&self, source_key: &str, dest_key: &str, amount: i64) -> Result<Transaction> {
        self.coordinator.transfer(source_key, dest_key, amount)
    }

    /// Atomically apply a balanced set of deltas.
    pub fn execute(&self, participants: Vec<Participant>) -> Result<Transaction> {
        self.coordinator.execute(participants)
    }

    /// Snapshot of every shard.
    pub fn shards(&self) -> Vec<ShardInfo> {
        self.router.table().shard_infos()
    }

    /// Current metrics.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Prometheus text export of the current metrics.
    pub fn metrics_text(&self) -> String {
        self.metrics.to_prometheus()
    }

    /// Router over the store's membership table.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Transaction coordinator.
    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    /// Active configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn lock<'a>(&self, shard: &'a Shard) -> Result<shardkv_store::ShardGuard<'a>> {
        shard.lock(self.config.lock_config.acquisition_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use shardkv_store::{KeyLengthPartitioner, PartitionStrategy};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    /// Routes `key<N>` to shard `N - 1`; anything else to shard 0.
    #[derive(Debug)]
    struct TrailingDigitPartitioner;

    impl Partitioner for TrailingDigitPartitioner {
        fn partition(&self, key: &str, shard_count: usize) -> usize {
            key.chars()
                .last()
                .and_then(|c| c.to_digit(10))
                .map(|d| (d as usize).saturating_sub(1) % shard_count)
                .unwrap_or(0)
        }

        fn describe(&self) -> String {
            "TrailingDigit".to_string()
        }
    }

    fn config(initial_shards: usize, max_shards: usize) -> StoreConfig {
        StoreConfig {
            max_shards,
            initial_shards,
            ..StoreConfig::default()
        }
    }

    #[test]
    fn test_create_starts_empty() {
        let store = Store::create(4);
        assert!(store.shards().is_empty());
        assert_eq!(store.get("k"), Err(ShardKvError::NoShards));

        assert_eq!(store.add_node().unwrap(), ShardId::new(0));
        assert_ok!(store.put("k", "v"));
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_put_get_delete() {
        let store = Store::with_config(config(4, 8)).unwrap();

        assert_eq!(store.get("missing").unwrap(), None);
        store.put("alpha", "1").unwrap();
        store.put("alpha", "2").unwrap();
        assert_eq!(store.get("alpha").unwrap().as_deref(), Some("2"));

        assert!(store.delete("alpha").unwrap());
        assert!(!store.delete("alpha").unwrap());
        assert_eq!(store.get("alpha").unwrap(), None);
    }

    #[test]
    fn test_add_node_capacity() {
        let max_shards = 3;
        let store = Store::create(max_shards);

        for expected in 0..max_shards {
            assert_eq!(store.add_node().unwrap(), ShardId::new(expected));
        }
        assert_eq!(
            store.add_node(),
            Err(ShardKvError::CapacityExceeded { max_shards })
        );
        assert_eq!(store.shards().len(), max_shards);
        assert_eq!(store.metrics().nodes_added, max_shards as u64);
    }

    #[test]
    fn test_remove_node_invalid_ids_leave_flags() {
        let store = Store::with_config(config(3, 3)).unwrap();

        for bad in [-1, 3] {
            assert_eq!(
                store.remove_node(bad),
                Err(ShardKvError::InvalidShardId {
                    shard_id: bad,
                    shard_count: 3,
                })
            );
        }
        assert!(store.shards().iter().all(|s| s.active));
    }

    #[test]
    fn test_remove_node_idempotent() {
        let store = Store::with_config(config(3, 3)).unwrap();

        assert!(assert_ok!(store.remove_node(2)));
        let after_first = store.shards();
        assert!(!assert_ok!(store.remove_node(2)));

        assert_eq!(store.shards(), after_first);
        assert!(!after_first[2].active);
        assert_eq!(store.metrics().nodes_removed, 1);
    }

    #[test]
    fn test_membership_scenario() {
        let partitioner = Arc::new(TrailingDigitPartitioner);
        let store = Store::with_partitioner(config(4, 8), partitioner).unwrap();

        store.put("key1", "value1").unwrap();
        store.put("key2", "value2").unwrap();
        let shards = store.shards();
        assert_eq!(shards[0].key_count, 1);
        assert_eq!(shards[1].key_count, 1);

        assert_eq!(store.add_node().unwrap(), ShardId::new(4));
        assert_ok!(store.remove_node(1));

        assert_eq!(
            store.get("key2"),
            Err(ShardKvError::ShardUnavailable(ShardId::new(1)))
        );
        assert_eq!(store.get("key1").unwrap().as_deref(), Some("value1"));
        assert_err!(store.put("key2", "again"));
    }

    #[test]
    fn test_transfer_through_store() {
        let store = Store::with_config(config(4, 4)).unwrap();
        store.put("alice", "50").unwrap();
        store.put("bob", "0").unwrap();

        let txn = store.transfer("alice", "bob", 50).unwrap();
        assert_eq!(txn.participants.len(), 2);
        assert_eq!(store.get("alice").unwrap().as_deref(), Some("0"));
        assert_eq!(store.get("bob").unwrap().as_deref(), Some("50"));

        assert!(matches!(
            store.transfer("alice", "bob", 1),
            Err(ShardKvError::InsufficientFunds { .. })
        ));
        assert_eq!(store.get("alice").unwrap().as_deref(), Some("0"));
        assert_eq!(store.get("bob").unwrap().as_deref(), Some("50"));

        let metrics = store.metrics();
        assert_eq!(metrics.transactions_committed, 1);
        assert_eq!(metrics.transactions_aborted, 1);
    }

    #[test]
    fn test_get_times_out_on_held_lock() {
        let mut cfg = config(1, 1);
        cfg.lock_config.acquisition_timeout = Some(Duration::from_millis(20));
        let store = Arc::new(Store::with_config(cfg).unwrap());
        store.put("k", "v").unwrap();

        let shard = store.router().table().shard(ShardId::new(0)).unwrap();
        let _held = shard.lock(None).unwrap();

        let reader = store.clone();
        let result = std::thread::spawn(move || reader.get("k")).join().unwrap();
        assert_eq!(
            result,
            Err(ShardKvError::LockTimeout {
                shard_id: ShardId::new(0),
                waited_ms: 20,
            })
        );
    }

    #[test]
    fn test_get_rejects_shard_deactivated_while_waiting() {
        let store = Arc::new(Store::with_config(config(1, 1)).unwrap());
        store.put("k", "v").unwrap();

        let shard = store.router().table().shard(ShardId::new(0)).unwrap();
        let held = shard.lock(None).unwrap();

        let reader = {
            let store = store.clone();
            std::thread::spawn(move || store.get("k"))
        };
        // Let the reader route and block on the shard lock.
        std::thread::sleep(Duration::from_millis(50));

        assert!(store.remove_node(0).unwrap());
        drop(held);

        assert_eq!(
            reader.join().unwrap(),
            Err(ShardKvError::ShardUnavailable(ShardId::new(0)))
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = Store::with_config(config(5, 4));
        assert!(matches!(result, Err(ShardKvError::ConfigurationError(_))));
    }

    #[test]
    fn test_strategy_from_config() {
        let mut cfg = config(2, 4);
        cfg.partition_strategy = PartitionStrategy::KeyLength;
        let store = Store::with_config(cfg).unwrap();

        assert_eq!(store.router().table().partitioner(), "KeyLength");
        assert_eq!(store.router().route("abc").unwrap(), ShardId::new(1));
    }

    #[test]
    fn test_key_length_reshuffles_after_add_node() {
        let store = Store::with_partitioner(config(4, 5), Arc::new(KeyLengthPartitioner)).unwrap();
        store.put("key4", "v").unwrap();
        assert_eq!(store.router().route("key4").unwrap(), ShardId::new(0));

        store.add_node().unwrap();
        // The key now routes to the new, empty shard.
        assert_eq!(store.router().route("key4").unwrap(), ShardId::new(4));
        assert_eq!(store.get("key4").unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_transfers_preserve_total() {
        let store = Arc::new(Store::with_config(config(4, 4)).unwrap());
        let accounts = ["acct-0", "acct-1", "acct-2", "acct-3", "acct-4", "acct-5"];
        for account in accounts {
            store.put(account, "100").unwrap();
        }

        let mut handles = Vec::new();
        for i in 0..120usize {
            let store = store.clone();
            let from = accounts[i % accounts.len()];
            let to = accounts[(i * 7 + 1) % accounts.len()];
            handles.push(tokio::task::spawn_blocking(move || {
                store.transfer(from, to, 3)
            }));
        }

        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) | Err(ShardKvError::InsufficientFunds { .. }) => {}
                Err(e) => panic!("unexpected transfer error: {}", e),
            }
        }

        let total: i64 = accounts
            .iter()
            .map(|a| store.get(a).unwrap().unwrap().parse::<i64>().unwrap())
            .sum();
        assert_eq!(total, 600);
        assert_eq!(store.coordinator().in_flight_count(), 0);
    }

    proptest! {
        #[test]
        fn prop_put_then_get(pairs in proptest::collection::vec(("[a-z]{1,12}", ".{0,16}"), 1..32)) {
            let store = Store::with_config(config(4, 4)).unwrap();
            let mut expected = std::collections::HashMap::new();
            for (key, value) in &pairs {
                store.put(key, value.clone()).unwrap();
                expected.insert(key.clone(), value.clone());
            }
            for (key, value) in &expected {
                prop_assert_eq!(store.get(key).unwrap(), Some(value.clone()));
            }
        }
    }
}
