//! Store configuration.

use std::time::Duration;

use shardkv_store::PartitionStrategy;

/// Lock configuration.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// How long to wait for a shard lock; `None` blocks indefinitely.
    pub acquisition_timeout: Option<Duration>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            acquisition_timeout: Some(Duration::from_secs(10)),
        }
    }
}

/// Main store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Upper bound on shards ever created.
    pub max_shards: usize,
    /// Shards created when the store starts.
    pub initial_shards: usize,
    /// Partition function.
    pub partition_strategy: PartitionStrategy,
    /// Lock configuration.
    pub lock_config: LockConfig,
    /// Log level.
    pub log_level: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_shards: 16,
            initial_shards: 4,
            partition_strategy: PartitionStrategy::default(),
            lock_config: LockConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl StoreConfig {
    /// Configuration for an initially empty table of `max_shards` capacity.
    pub fn with_capacity(max_shards: usize) -> Self {
        Self {
            max_shards,
            initial_shards: 0,
            ..Self::default()
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(max) = std::env::var("SHARDKV_MAX_SHARDS") {
            if let Ok(max) = max.parse() {
                config.max_shards = max;
            }
        }

        if let Ok(initial) = std::env::var("SHARDKV_INITIAL_SHARDS") {
            if let Ok(initial) = initial.parse() {
                config.initial_shards = initial;
            }
        }

        if let Ok(strategy) = std::env::var("SHARDKV_PARTITION_STRATEGY") {
            if let Ok(strategy) = strategy.parse() {
                config.partition_strategy = strategy;
            }
        }

        if let Ok(timeout) = std::env::var("SHARDKV_LOCK_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse::<u64>() {
                config.lock_config.acquisition_timeout =
                    (ms > 0).then(|| Duration::from_millis(ms));
            }
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.initial_shards > self.max_shards {
            return Err(format!(
                "Initial shard count {} exceeds max shards {}",
                self.initial_shards, self.max_shards
            ));
        }

        if self.lock_config.acquisition_timeout == Some(Duration::ZERO) {
            return Err("Lock acquisition timeout must be positive".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.partition_strategy, PartitionStrategy::Hash);
    }

    #[test]
    fn test_with_capacity_starts_empty() {
        let config = StoreConfig::with_capacity(4);
        assert_eq!(config.max_shards, 4);
        assert_eq!(config.initial_shards, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let mut config = StoreConfig::default();
        config.initial_shards = config.max_shards + 1;
        assert!(config.validate().is_err());

        let mut config = StoreConfig::default();
        config.lock_config.acquisition_timeout = Some(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_blocking_locks_are_valid() {
        let mut config = StoreConfig::default();
        config.lock_config.acquisition_timeout = None;
        assert!(config.validate().is_ok());
    }
}
