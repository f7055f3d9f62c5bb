//! ShardKV demo binary
//!
//! Boots a store from the environment, runs a burst of concurrent random
//! transfers, exercises membership changes, and reports the outcome.

use std::sync::Arc;

use rand::Rng;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shardkv_common::ShardKvError;
use shardkv_coordinator::{Store, StoreConfig};

const ACCOUNTS: usize = 32;
const INITIAL_BALANCE: i64 = 1_000;
const TRANSFERS: usize = 2_000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = StoreConfig::from_env();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let node_id = format!("shardkv-{}", uuid::Uuid::new_v4());
    info!(node_id = %node_id, "Starting ShardKV");

    let store = Arc::new(Store::with_config(config)?);

    let accounts: Vec<String> = (0..ACCOUNTS).map(|i| format!("account-{:03}", i)).collect();
    for account in &accounts {
        store.put(account, INITIAL_BALANCE.to_string())?;
    }
    let accounts = Arc::new(accounts);

    let mut handles = Vec::with_capacity(TRANSFERS);
    for _ in 0..TRANSFERS {
        let store = store.clone();
        let accounts = accounts.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            let mut rng = rand::thread_rng();
            let from = &accounts[rng.gen_range(0..accounts.len())];
            let to = &accounts[rng.gen_range(0..accounts.len())];
            let amount = rng.gen_range(1..=INITIAL_BALANCE / 4);
            store.transfer(from, to, amount).map(|_| ())
        }));
    }

    let mut insufficient = 0usize;
    for handle in handles {
        match handle.await? {
            Ok(()) => {}
            Err(ShardKvError::InsufficientFunds { .. }) => insufficient += 1,
            Err(e) => warn!(error = %e, code = e.error_code(), "Transfer failed"),
        }
    }

    let total = total_balance(&store, &accounts)?;
    let expected = INITIAL_BALANCE * ACCOUNTS as i64;
    if total != expected {
        error!(total, expected, "Balance invariant violated");
        return Err(anyhow::anyhow!("total {} != expected {}", total, expected));
    }
    info!(total, insufficient, "Transfers complete, balance invariant holds");

    // Membership changes only affect routing for subsequent operations.
    match store.add_node() {
        Ok(shard_id) => info!(shard_id = %shard_id, "Added shard"),
        Err(e) => info!(error = %e, "Shard not added"),
    }
    store.remove_node(0)?;
    let unavailable = accounts
        .iter()
        .filter(|a| matches!(store.get(a), Err(ShardKvError::ShardUnavailable(_))))
        .count();
    info!(
        unavailable,
        shards = %serde_json::to_string(&store.shards())?,
        "Shard 0 deactivated"
    );

    info!(
        metrics = %serde_json::to_string(&store.metrics())?,
        "ShardKV demo complete"
    );
    Ok(())
}

fn total_balance(store: &Store, accounts: &[String]) -> anyhow::Result<i64> {
    let mut total = 0i64;
    for account in accounts {
        let value = store
            .get(account)?
            .ok_or_else(|| anyhow::anyhow!("account {} missing", account))?;
        total += value.parse::<i64>()?;
    }
    Ok(total)
}
