//! Error types for ShardKV operations.

use crate::{ShardId, TransactionState};
use thiserror::Error;

/// Main error type for ShardKV operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShardKvError {
    /// Membership table is full.
    #[error("Capacity exceeded: table already holds the maximum of {max_shards} shards")]
    CapacityExceeded { max_shards: usize },

    /// Shard id outside the current table range.
    #[error("Invalid shard id {shard_id}: table holds {shard_count} shards")]
    InvalidShardId { shard_id: i64, shard_count: usize },

    /// Key absent where a value is required.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Source balance does not cover the requested debit.
    #[error("Insufficient funds at {key}: required {required}, available {available}")]
    InsufficientFunds {
        key: String,
        required: i64,
        available: i64,
    },

    /// Key routes to a shard that is not serving traffic.
    #[error("Shard unavailable: {0}")]
    ShardUnavailable(ShardId),

    /// Write attempted on a deactivated shard.
    #[error("Shard {0} is inactive")]
    InactiveShard(ShardId),

    /// Shard lock not acquired within the configured timeout.
    #[error("Lock on shard {shard_id} not acquired within {waited_ms}ms")]
    LockTimeout { shard_id: ShardId, waited_ms: u64 },

    /// Routing attempted against an empty membership table.
    #[error("No shards in membership table")]
    NoShards,

    /// Transfer amount must be positive.
    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),

    /// Stored value cannot be read as an integer balance.
    #[error("Value at {key} is not a balance: {value:?}")]
    InvalidBalance { key: String, value: String },

    /// Applying a delta would overflow the balance.
    #[error("Balance overflow at {0}")]
    BalanceOverflow(String),

    /// Transaction with no participants.
    #[error("Transaction has no participants")]
    EmptyTransaction,

    /// Participant deltas do not sum to zero.
    #[error("Transaction deltas do not balance: net {net}")]
    UnbalancedTransaction { net: i128 },

    /// Invalid state transition.
    #[error("Invalid transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: TransactionState,
        to: TransactionState,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl ShardKvError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ShardKvError::LockTimeout { .. }
                | ShardKvError::ShardUnavailable(_)
                | ShardKvError::InactiveShard(_)
        )
    }

    /// Get error code for remote callers.
    pub fn error_code(&self) -> &'static str {
        match self {
            ShardKvError::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            ShardKvError::InvalidShardId { .. } => "INVALID_SHARD_ID",
            ShardKvError::KeyNotFound(_) => "KEY_NOT_FOUND",
            ShardKvError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            ShardKvError::ShardUnavailable(_) => "SHARD_UNAVAILABLE",
            ShardKvError::InactiveShard(_) => "INACTIVE_SHARD",
            ShardKvError::LockTimeout { .. } => "LOCK_TIMEOUT",
            ShardKvError::NoShards => "NO_SHARDS",
            ShardKvError::InvalidAmount(_) => "INVALID_AMOUNT",
            ShardKvError::InvalidBalance { .. } => "INVALID_BALANCE",
            ShardKvError::BalanceOverflow(_) => "BALANCE_OVERFLOW",
            ShardKvError::EmptyTransaction => "EMPTY_TRANSACTION",
            ShardKvError::UnbalancedTransaction { .. } => "UNBALANCED_TRANSACTION",
            ShardKvError::InvalidTransition { .. } => "INVALID_TRANSITION",
            ShardKvError::ConfigurationError(_) => "CONFIGURATION_ERROR",
        }
    }
}

/// Result type alias for ShardKV operations.
pub type Result<T> = std::result::Result<T, ShardKvError>;
