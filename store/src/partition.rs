//! Partition functions mapping keys to shard indices.
//!
//! The modulo-based partitioners reshuffle most keys whenever the shard
//! count changes. [`RendezvousPartitioner`] only moves the keys that land on
//! a newly added shard.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Trait for partition functions that determine shard assignment.
///
/// Implementations must be deterministic: the same key and shard count must
/// always map to the same index, and the index must be `< shard_count`.
/// Callers never pass `shard_count == 0`.
pub trait Partitioner: Send + Sync + fmt::Debug {
    /// Returns the shard index owning `key`.
    fn partition(&self, key: &str, shard_count: usize) -> usize;

    /// Returns a description of the partitioner for debugging.
    fn describe(&self) -> String;
}

/// `len(key) mod shard_count`.
///
/// Reproduces the original length-based routing for compatibility testing.
/// Every key of a given length lands on the same shard.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyLengthPartitioner;

impl Partitioner for KeyLengthPartitioner {
    fn partition(&self, key: &str, shard_count: usize) -> usize {
        key.len() % shard_count
    }

    fn describe(&self) -> String {
        "KeyLength".to_string()
    }
}

/// `sha256(key) mod shard_count`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashPartitioner;

impl Partitioner for HashPartitioner {
    fn partition(&self, key: &str, shard_count: usize) -> usize {
        (digest_u64(&[key.as_bytes()]) % shard_count as u64) as usize
    }

    fn describe(&self) -> String {
        "Hash(sha256)".to_string()
    }
}

/// Highest-random-weight hashing over shard indices.
///
/// Each shard scores `sha256(key || index)`; the highest score wins. Growing
/// the table from `n` to `n + 1` shards only moves keys onto shard `n`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RendezvousPartitioner;

impl Partitioner for RendezvousPartitioner {
    fn partition(&self, key: &str, shard_count: usize) -> usize {
        (0..shard_count)
            .max_by_key(|index| {
                let index = (*index as u64).to_le_bytes();
                digest_u64(&[key.as_bytes(), &index[..]])
            })
            .unwrap_or(0)
    }

    fn describe(&self) -> String {
        "Rendezvous(sha256)".to_string()
    }
}

fn digest_u64(parts: &[&[u8]]) -> u64 {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// Built-in partition strategies selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStrategy {
    KeyLength,
    #[default]
    Hash,
    Rendezvous,
}

impl PartitionStrategy {
    /// Instantiate the partitioner for this strategy.
    pub fn build(&self) -> Arc<dyn Partitioner> {
        match self {
            PartitionStrategy::KeyLength => Arc::new(KeyLengthPartitioner),
            PartitionStrategy::Hash => Arc::new(HashPartitioner),
            PartitionStrategy::Rendezvous => Arc::new(RendezvousPartitioner),
        }
    }
}

impl FromStr for PartitionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "key_length" | "length" => Ok(PartitionStrategy::KeyLength),
            "hash" => Ok(PartitionStrategy::Hash),
            "rendezvous" | "hrw" => Ok(PartitionStrategy::Rendezvous),
            other => Err(format!("Unknown partition strategy: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_key_length_matches_original_routing() {
        let partitioner = KeyLengthPartitioner;
        // "key4" has length 4; with 5 shards it maps to 4 % 5.
        assert_eq!(partitioner.partition("key4", 5), 4);
        assert_eq!(partitioner.partition("key4", 4), 0);
        assert_eq!(partitioner.partition("", 3), 0);
    }

    #[test]
    fn test_hash_is_stable() {
        let partitioner = HashPartitioner;
        let first = partitioner.partition("account:42", 16);
        for _ in 0..10 {
            assert_eq!(partitioner.partition("account:42", 16), first);
        }
    }

    #[test]
    fn test_hash_spreads_same_length_keys() {
        let partitioner = HashPartitioner;
        let shards: std::collections::HashSet<_> = (0..100)
            .map(|i| partitioner.partition(&format!("key{:03}", i), 8))
            .collect();
        assert!(shards.len() > 1);
    }

    #[test]
    fn test_rendezvous_growth_only_moves_to_new_shard() {
        let partitioner = RendezvousPartitioner;
        for i in 0..500 {
            let key = format!("user-{}", i);
            let before = partitioner.partition(&key, 4);
            let after = partitioner.partition(&key, 5);
            assert!(after == before || after == 4, "key {} moved {} -> {}", key, before, after);
        }
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("hash".parse::<PartitionStrategy>(), Ok(PartitionStrategy::Hash));
        assert_eq!(
            "KEY_LENGTH".parse::<PartitionStrategy>(),
            Ok(PartitionStrategy::KeyLength)
        );
        assert_eq!(
            " rendezvous ".parse::<PartitionStrategy>(),
            Ok(PartitionStrategy::Rendezvous)
        );
        assert!("ring".parse::<PartitionStrategy>().is_err());
        assert_eq!(PartitionStrategy::default(), PartitionStrategy::Hash);
    }

    #[test]
    fn test_strategy_builds_matching_partitioner() {
        assert_eq!(PartitionStrategy::KeyLength.build().describe(), "KeyLength");
        assert_eq!(PartitionStrategy::Hash.build().describe(), "Hash(sha256)");
        assert_eq!(
            PartitionStrategy::Rendezvous.build().describe(),
            "Rendezvous(sha256)"
        );
    }

    proptest! {
        #[test]
        fn prop_partition_in_range(key in ".*", shard_count in 1usize..64) {
            for strategy in [
                PartitionStrategy::KeyLength,
                PartitionStrategy::Hash,
                PartitionStrategy::Rendezvous,
            ] {
                let partitioner = strategy.build();
                let index = partitioner.partition(&key, shard_count);
                prop_assert!(index < shard_count);
                prop_assert_eq!(index, partitioner.partition(&key, shard_count));
            }
        }

        #[test]
        fn prop_single_shard_always_zero(key in "[a-z0-9]{0,32}") {
            prop_assert_eq!(HashPartitioner.partition(&key, 1), 0);
            prop_assert_eq!(RendezvousPartitioner.partition(&key, 1), 0);
        }
    }
}
