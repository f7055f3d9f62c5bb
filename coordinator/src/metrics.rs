//! Metrics collection for store monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Store and coordinator metrics.
pub struct Metrics {
    /// Total transactions started.
    pub transactions_total: AtomicU64,
    /// Committed transactions.
    pub transactions_committed: AtomicU64,
    /// Aborted transactions.
    pub transactions_aborted: AtomicU64,
    /// Transactions in flight.
    pub transactions_active: AtomicU64,
    /// Aborted transactions that needed compensating writes.
    pub transactions_rolled_back: AtomicU64,
    /// Transactions whose participants all lived on one shard.
    pub transactions_single_shard: AtomicU64,
    /// Transactions spanning several shards.
    pub transactions_cross_shard: AtomicU64,
    /// Lock acquisition timeouts.
    pub lock_timeouts: AtomicU64,
    /// Shards added.
    pub nodes_added: AtomicU64,
    /// Shards deactivated.
    pub nodes_removed: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            transactions_total: AtomicU64::new(0),
            transactions_committed: AtomicU64::new(0),
            transactions_aborted: AtomicU64::new(0),
            transactions_active: AtomicU64::new(0),
            transactions_rolled_back: AtomicU64::new(0),
            transactions_single_shard: AtomicU64::new(0),
            transactions_cross_shard: AtomicU64::new(0),
            lock_timeouts: AtomicU64::new(0),
            nodes_added: AtomicU64::new(0),
            nodes_removed: AtomicU64::new(0),
        }
    }

    /// Increment transaction started.
    pub fn transaction_started(&self) {
        self.transactions_total.fetch_add(1, Ordering::Relaxed);
        self.transactions_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record transaction commit.
    pub fn transaction_committed(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
        self.transactions_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record transaction abort.
    pub fn transaction_aborted(&self, rolled_back: bool) {
        self.transactions_aborted.fetch_add(1, Ordering::Relaxed);
        self.transactions_active.fetch_sub(1, Ordering::Relaxed);
        if rolled_back {
            self.transactions_rolled_back.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record the shard span of a locked transaction.
    pub fn transaction_span(&self, shard_count: usize) {
        if shard_count <= 1 {
            self.transactions_single_shard.fetch_add(1, Ordering::Relaxed);
        } else {
            self.transactions_cross_shard.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record lock timeout.
    pub fn lock_timeout(&self) {
        self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record shard added.
    pub fn node_added(&self) {
        self.nodes_added.fetch_add(1, Ordering::Relaxed);
    }

    /// Record shard deactivated.
    pub fn node_removed(&self) {
        self.nodes_removed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            transactions_total: self.transactions_total.load(Ordering::Relaxed),
            transactions_committed: self.transactions_committed.load(Ordering::Relaxed),
            transactions_aborted: self.transactions_aborted.load(Ordering::Relaxed),
            transactions_active: self.transactions_active.load(Ordering::Relaxed),
            transactions_rolled_back: self.transactions_rolled_back.load(Ordering::Relaxed),
            transactions_single_shard: self.transactions_single_shard.load(Ordering::Relaxed),
            transactions_cross_shard: self.transactions_cross_shard.load(Ordering::Relaxed),
            lock_timeouts: self.lock_timeouts.load(Ordering::Relaxed),
            nodes_added: self.nodes_added.load(Ordering::Relaxed),
            nodes_removed: self.nodes_removed.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus text format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let series = [
            ("transactions_total", "counter", "Total transactions started", snapshot.transactions_total),
            ("transactions_committed", "counter", "Committed transactions", snapshot.transactions_committed),
            ("transactions_aborted", "counter", "Aborted transactions", snapshot.transactions_aborted),
            ("transactions_active", "gauge", "Transactions in flight", snapshot.transactions_active),
            ("transactions_rolled_back", "counter", "Transactions rolled back after a failed write", snapshot.transactions_rolled_back),
            ("transactions_single_shard", "counter", "Single-shard transactions", snapshot.transactions_single_shard),
            ("transactions_cross_shard", "counter", "Cross-shard transactions", snapshot.transactions_cross_shard),
            ("lock_timeouts", "counter", "Shard lock acquisition timeouts", snapshot.lock_timeouts),
            ("nodes_added", "counter", "Shards added", snapshot.nodes_added),
            ("nodes_removed", "counter", "Shards deactivated", snapshot.nodes_removed),
        ];

        series
            .iter()
            .map(|(name, kind, help, value)| {
                format!(
                    "# HELP shardkv_{name} {help}\n# TYPE shardkv_{name} {kind}\nshardkv_{name} {value}\n"
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub transactions_total: u64,
    pub transactions_committed: u64,
    pub transactions_aborted: u64,
    pub transactions_active: u64,
    pub transactions_rolled_back: u64,
    pub transactions_single_shard: u64,
    pub transactions_cross_shard: u64,
    pub lock_timeouts: u64,
    pub nodes_added: u64,
    pub nodes_removed: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;
