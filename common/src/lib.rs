//! ShardKV Common Types
//!
//! Shared types used across the ShardKV workspace: shard and transaction
//! identifiers, the error taxonomy, and the transaction state machine.

pub mod identifiers;
pub mod transaction;
pub mod error;

pub use identifiers::*;
pub use transaction::*;
pub use error::*;
