//! ShardKV Coordinator
//!
//! The store facade and the transaction coordinator that moves value between
//! keys, possibly on different shards, with all-or-nothing semantics.

pub mod coordinator;
pub mod config;
pub mod lock_manager;
pub mod store;
pub mod metrics;

pub use coordinator::TransactionCoordinator;
pub use config::{LockConfig, StoreConfig};
pub use store::Store;
