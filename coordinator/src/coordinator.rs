//! Atomic multi-shard transaction coordinator.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, instrument, warn};

use shardkv_common::{
    Participant, Result, ShardId, ShardKvError, Transaction, TransactionId, TransactionState,
};
use shardkv_store::{Router, Shard};

use crate::config::LockConfig;
use crate::lock_manager::{LockManager, LockSet};
use crate::metrics::SharedMetrics;

/// One balance write computed during validation.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingWrite {
    shard_id: ShardId,
    key: String,
    /// Value observed under the lock, restored on rollback.
    previous: Option<String>,
    next: String,
}

/// Net effect of every participant sharing one key.
#[derive(Debug)]
struct KeyPlan {
    shard_id: ShardId,
    key: String,
    net: i128,
    /// Sum of debits against this key; the pre-transaction balance must cover it.
    debit: i128,
    debited: bool,
}

/// Why a transaction was abandoned.
#[derive(Debug)]
struct Abort {
    error: ShardKvError,
    rolled_back: bool,
}

impl From<ShardKvError> for Abort {
    fn from(error: ShardKvError) -> Self {
        Self {
            error,
            rolled_back: false,
        }
    }
}

/// Coordinates lock-based atomic transactions across shards.
///
/// Locks for every participant shard are held across the whole
/// read-validate-write window, so other callers observe either the
/// pre-transaction or the post-transaction balances.
pub struct TransactionCoordinator {
    router: Router,
    lock_manager: LockManager,
    /// States of transactions currently executing.
    in_flight: Arc<DashMap<TransactionId, TransactionState>>,
    metrics: SharedMetrics,
}

impl TransactionCoordinator {
    /// Create a new coordinator.
    pub fn new(router: Router, lock_config: LockConfig, metrics: SharedMetrics) -> Self {
        Self {
            router,
            lock_manager: LockManager::new(lock_config, metrics.clone()),
            in_flight: Arc::new(DashMap::new()),
            metrics,
        }
    }

    /// Move `amount` from `source_key` to `dest_key`.
    ///
    /// The source must exist and hold at least `amount`; a missing
    /// destination starts at zero.
    #[instrument(skip(self))]
    pub fn transfer(&self, source_key: &str, dest_key: &str, amount: i64) -> Result<Transaction> {
        if amount <= 0 {
            return Err(ShardKvError::InvalidAmount(amount));
        }
        self.run(Transaction::transfer(source_key, dest_key, amount))
    }

    /// Apply every participant delta atomically.
    ///
    /// Deltas must sum to zero. Participants naming the same key are
    /// merged; a key with any debit must exist and cover the sum of its
    /// debits.
    #[instrument(skip(self, participants), fields(participants = participants.len()))]
    pub fn execute(&self, participants: Vec<Participant>) -> Result<Transaction> {
        if participants.is_empty() {
            return Err(ShardKvError::EmptyTransaction);
        }

        let txn = Transaction::new(participants);
        let net = txn.net_delta();
        if net != 0 {
            return Err(ShardKvError::UnbalancedTransaction { net });
        }

        self.run(txn)
    }

    /// Number of transactions currently executing.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// State of an executing transaction.
    pub fn in_flight_state(&self, id: &TransactionId) -> Option<TransactionState> {
        self.in_flight.get(id).map(|s| *s)
    }

    // --- Private methods ---

    fn run(&self, mut txn: Transaction) -> Result<Transaction> {
        self.metrics.transaction_started();
        self.in_flight.insert(txn.id, txn.state);

        let outcome = self.drive(&mut txn);
        self.in_flight.remove(&txn.id);

        match outcome {
            Ok(()) => {
                self.metrics.transaction_committed();
                info!(
                    transaction_id = %txn.id,
                    shards = ?txn.shards(),
                    duration_ms = txn.timing.total_duration_ms(),
                    "Transaction committed"
                );
                Ok(txn)
            }
            Err(Abort { error, rolled_back }) => {
                if let Err(e) = txn.abort(&error, rolled_back) {
                    warn!(transaction_id = %txn.id, error = %e, "Failure not recorded");
                }
                self.metrics.transaction_aborted(rolled_back);
                warn!(
                    transaction_id = %txn.id,
                    error = %error,
                    rolled_back,
                    "Transaction aborted"
                );
                Err(error)
            }
        }
    }

    fn drive(&self, txn: &mut Transaction) -> std::result::Result<(), Abort> {
        // Pending -> Locked
        let owners = self.resolve(txn)?;
        let mut locks = self.lock_manager.acquire(&owners)?;
        self.advance(txn, TransactionState::Locked)?;

        self.metrics.transaction_span(locks.len());
        if locks.len() == 1 {
            debug!(transaction_id = %txn.id, "Single-shard local transaction");
        }

        // Locked -> Validated
        let writes = plan_writes(&txn.participants, &owners, &locks)?;
        self.advance(txn, TransactionState::Validated)?;

        // Validated -> Committed
        commit_writes(&mut locks, &writes)?;
        self.advance(txn, TransactionState::Committed)?;

        locks.release();
        Ok(())
    }

    /// Route every participant, returning owners aligned with participants.
    fn resolve(&self, txn: &mut Transaction) -> Result<Vec<Arc<Shard>>> {
        txn.participants
            .iter_mut()
            .map(|participant| -> Result<Arc<Shard>> {
                let shard = self.router.locate(&participant.key)?;
                participant.shard = Some(shard.id());
                Ok(shard)
            })
            .collect()
    }

    fn advance(&self, txn: &mut Transaction, next: TransactionState) -> Result<()> {
        txn.transition_to(next)?;
        if let Some(mut state) = self.in_flight.get_mut(&txn.id) {
            *state = next;
        }
        Ok(())
    }
}

fn parse_balance(key: &str, value: &str) -> Result<i64> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| ShardKvError::InvalidBalance {
            key: key.to_string(),
            value: value.to_string(),
        })
}

/// Read and validate every balance, producing the writes to apply.
fn plan_writes(
    participants: &[Participant],
    owners: &[Arc<Shard>],
    locks: &LockSet<'_>,
) -> Result<Vec<PendingWrite>> {
    let mut plans: Vec<KeyPlan> = Vec::with_capacity(participants.len());

    for (participant, owner) in participants.iter().zip(owners) {
        let index = match plans.iter().position(|p| p.key == participant.key) {
            Some(index) => index,
            None => {
                plans.push(KeyPlan {
                    shard_id: owner.id(),
                    key: participant.key.clone(),
                    net: 0,
                    debit: 0,
                    debited: false,
                });
                plans.len() - 1
            }
        };

        let plan = &mut plans[index];
        plan.net += i128::from(participant.delta);
        if participant.is_debit() {
            plan.debited = true;
            plan.debit -= i128::from(participant.delta);
        }
    }

    let mut writes = Vec::with_capacity(plans.len());
    for plan in plans {
        let guard = locks
            .guard(plan.shard_id)
            .ok_or(ShardKvError::ShardUnavailable(plan.shard_id))?;

        let previous = guard.get(&plan.key).cloned();
        let balance = match &previous {
            Some(value) => parse_balance(&plan.key, value)?,
            None if plan.debited => return Err(ShardKvError::KeyNotFound(plan.key)),
            None => 0,
        };

        if plan.debited && i128::from(balance) < plan.debit {
            return Err(ShardKvError::InsufficientFunds {
                required: i64::try_from(plan.debit).unwrap_or(i64::MAX),
                available: balance,
                key: plan.key,
            });
        }

        // Keys with no net effect are validated but never written.
        if plan.net == 0 {
            continue;
        }

        let next = i64::try_from(i128::from(balance) + plan.net)
            .map_err(|_| ShardKvError::BalanceOverflow(plan.key.clone()))?;

        writes.push(PendingWrite {
            shard_id: plan.shard_id,
            key: plan.key,
            previous,
            next: next.to_string(),
        });
    }

    Ok(writes)
}

/// Apply writes in order; on failure restore every write already applied.
fn commit_writes(
    locks: &mut LockSet<'_>,
    writes: &[PendingWrite],
) -> std::result::Result<(), Abort> {
    for (applied, write) in writes.iter().enumerate() {
        let result = match locks.guard_mut(write.shard_id) {
            Some(guard) => guard.put(write.key.as_str(), write.next.as_str()).map(|_| ()),
            None => Err(ShardKvError::ShardUnavailable(write.shard_id)),
        };

        if let Err(error) = result {
            warn!(
                shard_id = %write.shard_id,
                key = %write.key,
                error = %error,
                compensating = applied,
                "Write failed, rolling back"
            );
            rollback(locks, &writes[..applied]);
            return Err(Abort {
                error,
                rolled_back: applied > 0,
            });
        }
    }
    Ok(())
}

fn rollback(locks: &mut LockSet<'_>, applied: &[PendingWrite]) {
    for write in applied.iter().rev() {
        if let Some(guard) = locks.guard_mut(write.shard_id) {
            guard.restore(&write.key, write.previous.clone());
        }
    }
}
