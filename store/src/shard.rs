//! Independently lockable key-space partitions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::debug;

use shardkv_common::{Result, ShardId, ShardKvError};

/// Point-in-time view of a shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardInfo {
    /// Shard ID.
    pub id: ShardId,
    /// Whether the shard is serving traffic.
    pub active: bool,
    /// Number of keys stored.
    pub key_count: usize,
}

/// A partition of the key space guarded by one mutex.
///
/// The active flag lives outside the mutex so that deactivation never waits
/// on, or interrupts, a holder of the lock.
#[derive(Debug)]
pub struct Shard {
    id: ShardId,
    active: AtomicBool,
    store: Mutex<HashMap<String, String>>,
}

impl Shard {
    /// Create a new active, empty shard.
    pub fn new(id: ShardId) -> Self {
        Self {
            id,
            active: AtomicBool::new(true),
            store: Mutex::new(HashMap::new()),
        }
    }

    /// Get the shard ID.
    pub fn id(&self) -> ShardId {
        self.id
    }

    /// Check if the shard is serving traffic.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop serving traffic. Returns whether the shard was active before.
    pub(crate) fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::AcqRel)
    }

    /// Read a key. `None` if the key is absent or the shard is inactive.
    pub fn get(&self, key: &str) -> Option<String> {
        let store = self.store.lock();
        if !self.is_active() {
            return None;
        }
        store.get(key).cloned()
    }

    /// Insert or overwrite a key.
    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        self.lock(None)?.put(key, value)?;
        Ok(())
    }

    /// Remove a key, reporting whether it existed.
    pub fn delete(&self, key: &str) -> Result<bool> {
        self.lock(None)?.delete(key)
    }

    /// Number of keys stored.
    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    /// Check if the shard holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the shard's status.
    pub fn info(&self) -> ShardInfo {
        ShardInfo {
            id: self.id,
            active: self.is_active(),
            key_count: self.len(),
        }
    }

    /// Acquire exclusive access to the shard.
    ///
    /// With `Some(timeout)` the call gives up after waiting that long and
    /// fails with [`ShardKvError::LockTimeout`]; with `None` it blocks.
    pub fn lock(&self, timeout: Option<Duration>) -> Result<ShardGuard<'_>> {
        let store = match timeout {
            Some(timeout) => self.store.try_lock_for(timeout).ok_or_else(|| {
                ShardKvError::LockTimeout {
                    shard_id: self.id,
                    waited_ms: timeout.as_millis() as u64,
                }
            })?,
            None => self.store.lock(),
        };

        debug!(shard_id = %self.id, "Shard lock acquired");
        Ok(ShardGuard { shard: self, store })
    }
}

/// Exclusive access to a shard's data; the lock is released on drop.
pub struct ShardGuard<'a> {
    shard: &'a Shard,
    store: MutexGuard<'a, HashMap<String, String>>,
}

impl<'a> ShardGuard<'a> {
    /// Get the guarded shard's ID.
    pub fn shard_id(&self) -> ShardId {
        self.shard.id
    }

    /// Check if the guarded shard is still active.
    pub fn is_active(&self) -> bool {
        self.shard.is_active()
    }

    /// Read a key under the held lock.
    ///
    /// Reads by a holder complete even if the shard was deactivated after
    /// the lock was taken.
    pub fn get(&self, key: &str) -> Option<&String> {
        self.store.get(key)
    }

    /// Insert or overwrite a key, returning the previous value.
    pub fn put(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Option<String>> {
        self.ensure_active()?;
        Ok(self.store.insert(key.into(), value.into()))
    }

    /// Remove a key, reporting whether it existed.
    pub fn delete(&mut self, key: &str) -> Result<bool> {
        self.ensure_active()?;
        Ok(self.store.remove(key).is_some())
    }

    /// Put a key back to a previously observed value.
    ///
    /// Compensating writes bypass the activity check: they undo a write this
    /// holder already made and must succeed even on a deactivated shard.
    pub fn restore(&mut self, key: &str, previous: Option<String>) {
        match previous {
            Some(value) => {
                self.store.insert(key.to_string(), value);
            }
            None => {
                self.store.remove(key);
            }
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.shard.is_active() {
            Ok(())
        } else {
            Err(ShardKvError::InactiveShard(self.shard.id))
        }
    }
}

impl std::fmt::Debug for ShardGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardGuard")
            .field("shard_id", &self.shard.id)
            .field("keys", &self.store.len())
            .finish()
    }
}
