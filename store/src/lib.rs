//! ShardKV Store
//!
//! Shards, partition functions, the membership table and the router that
//! together own and locate every key in the store.

pub mod shard;
pub mod partition;
pub mod membership;
pub mod router;

pub use shard::{Shard, ShardGuard, ShardInfo};
pub use partition::{
    HashPartitioner, KeyLengthPartitioner, PartitionStrategy, Partitioner, RendezvousPartitioner,
};
pub use membership::MembershipTable;
pub use router::Router;
