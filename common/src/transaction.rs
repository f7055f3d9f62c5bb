//! Transaction types and state machine.

use crate::{ShardId, ShardKvError, TransactionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transaction state representing the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionState {
    /// Created, shards not yet locked.
    Pending,
    /// All participant shards locked.
    Locked,
    /// Balances read and checked.
    Validated,
    /// All writes applied.
    Committed,
    /// Abandoned; any applied writes were compensated.
    Aborted,
}

impl TransactionState {
    /// Check if this is a final state.
    pub fn is_final(&self) -> bool {
        matches!(self, TransactionState::Committed | TransactionState::Aborted)
    }

    /// Check if transaction is in progress.
    pub fn is_in_progress(&self) -> bool {
        !self.is_final()
    }

    /// Get valid next states from current state.
    pub fn valid_transitions(&self) -> &[TransactionState] {
        match self {
            TransactionState::Pending => &[TransactionState::Locked, TransactionState::Aborted],
            TransactionState::Locked => &[TransactionState::Validated, TransactionState::Aborted],
            TransactionState::Validated => {
                &[TransactionState::Committed, TransactionState::Aborted]
            }
            TransactionState::Committed => &[],
            TransactionState::Aborted => &[],
        }
    }

    /// Check if transition to given state is valid.
    pub fn can_transition_to(&self, next: TransactionState) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// One (key, delta) location touched by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Key holding the balance.
    pub key: String,
    /// Signed change applied to the balance.
    pub delta: i64,
    /// Owning shard (set after routing).
    pub shard: Option<ShardId>,
}

impl Participant {
    /// Create a participant applying `delta` to `key`.
    pub fn new(key: impl Into<String>, delta: i64) -> Self {
        Self {
            key: key.into(),
            delta,
            shard: None,
        }
    }

    /// Participant debiting `amount` from `key`.
    ///
    /// `amount` is expected in `1..=i64::MAX`; `i64::MIN` has no positive
    /// counterpart and is kept as the largest representable debit.
    pub fn debit(key: impl Into<String>, amount: i64) -> Self {
        Self::new(key, amount.checked_neg().unwrap_or(i64::MIN))
    }

    /// Participant crediting `amount` to `key`.
    pub fn credit(key: impl Into<String>, amount: i64) -> Self {
        Self::new(key, amount)
    }

    /// Check if this participant removes value from its key.
    pub fn is_debit(&self) -> bool {
        self.delta < 0
    }
}

/// Failure details for an aborted transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionFailure {
    /// Error code (see [`ShardKvError::error_code`]).
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Whether compensating writes were applied.
    pub rolled_back: bool,
    /// When the failure occurred.
    pub failed_at: DateTime<Utc>,
}

/// Timing metrics for a transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionTiming {
    pub created_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub validated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TransactionTiming {
    /// Create new timing with current timestamp as creation time.
    pub fn new() -> Self {
        Self {
            created_at: Utc::now(),
            locked_at: None,
            validated_at: None,
            completed_at: None,
        }
    }

    /// Get total duration in milliseconds (if completed).
    pub fn total_duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|end| (end - self.created_at).num_milliseconds())
    }
}

impl Default for TransactionTiming {
    fn default() -> Self {
        Self::new()
    }
}

/// A single atomic multi-key transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction identifier.
    pub id: TransactionId,
    /// Current state.
    pub state: TransactionState,
    /// Participants in request order.
    pub participants: Vec<Participant>,
    /// Timing metrics.
    pub timing: TransactionTiming,
    /// Failure information (if aborted).
    pub failure: Option<TransactionFailure>,
}

impl Transaction {
    /// Create a new pending transaction.
    pub fn new(participants: Vec<Participant>) -> Self {
        Self {
            id: TransactionId::new(),
            state: TransactionState::Pending,
            participants,
            timing: TransactionTiming::new(),
            failure: None,
        }
    }

    /// Two-party transfer moving `amount` from `source` to `dest`.
    pub fn transfer(source: impl Into<String>, dest: impl Into<String>, amount: i64) -> Self {
        Self::new(vec![
            Participant::debit(source, amount),
            Participant::credit(dest, amount),
        ])
    }

    /// Transition to a new state.
    pub fn transition_to(&mut self, next: TransactionState) -> Result<(), ShardKvError> {
        if !self.state.can_transition_to(next) {
            return Err(ShardKvError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        self.state = next;

        let now = Utc::now();
        match next {
            TransactionState::Locked => self.timing.locked_at = Some(now),
            TransactionState::Validated => self.timing.validated_at = Some(now),
            TransactionState::Committed | TransactionState::Aborted => {
                self.timing.completed_at = Some(now)
            }
            TransactionState::Pending => {}
        }

        Ok(())
    }

    /// Mark transaction as aborted.
    pub fn abort(&mut self, error: &ShardKvError, rolled_back: bool) -> Result<(), ShardKvError> {
        self.transition_to(TransactionState::Aborted)?;
        self.failure = Some(TransactionFailure {
            code: error.error_code().to_string(),
            message: error.to_string(),
            rolled_back,
            failed_at: Utc::now(),
        });
        Ok(())
    }

    /// Sum of all participant deltas.
    pub fn net_delta(&self) -> i128 {
        self.participants
            .iter()
            .map(|p| i128::from(p.delta))
            .sum()
    }

    /// Distinct shards touched, ascending. Only meaningful after routing.
    pub fn shards(&self) -> Vec<ShardId> {
        let mut shards: Vec<ShardId> = self.participants.iter().filter_map(|p| p.shard).collect();
        shards.sort();
        shards.dedup();
        shards
    }

    /// Check if all participants live on one shard.
    pub fn is_single_shard(&self) -> bool {
        self.shards().len() <= 1
    }
}
