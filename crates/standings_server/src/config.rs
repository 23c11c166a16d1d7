//! Runtime configuration for a standings server process.

use crate::error::ServerError;
use standings_core::{BroadcasterConfig, CacheConfig, PartitionKey, RankServiceConfig, RetryPolicy};
use std::time::Duration;
use uuid::Uuid;

/// Everything a [`StandingsServer`](crate::StandingsServer) needs to run.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Stamped on every published event; must be unique across the fleet.
    pub instance_id: String,

    /// Partitions swept on every scheduler tick. Partitions touched by
    /// recorded matches are added at runtime.
    pub tracked_partitions: Vec<PartitionKey>,

    /// Interval between scheduled sweeps. Zero disables the scheduler.
    pub sweep_interval: Duration,

    /// How long a partition picked up at runtime stays tracked without
    /// activity or local watchers. Configured partitions never expire. Zero
    /// keeps everything forever.
    pub idle_partition_ttl: Duration,

    pub cache: CacheConfig,
    pub retry: RetryPolicy,
    pub ranking: RankServiceConfig,
    pub broadcast: BroadcasterConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            instance_id: format!("standings-{}", Uuid::new_v4()),
            tracked_partitions: vec![PartitionKey::global()],
            sweep_interval: Duration::from_secs(30),
            idle_partition_ttl: Duration::from_secs(15 * 60),
            cache: CacheConfig::default(),
            retry: RetryPolicy::default(),
            ranking: RankServiceConfig::default(),
            broadcast: BroadcasterConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.instance_id.trim().is_empty() {
            return Err(ServerError::Config("instance_id cannot be empty".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ServerError::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if self.ranking.max_page_size == 0 {
            return Err(ServerError::Config("max_page_size must be greater than 0".to_string()));
        }
        if self.ranking.top_n == 0 || self.ranking.top_n > self.ranking.max_page_size {
            return Err(ServerError::Config(format!(
                "top_n must be between 1 and max_page_size ({})",
                self.ranking.max_page_size
            )));
        }
        if self.cache.io_timeout.is_zero() {
            return Err(ServerError::Config("cache io_timeout must be greater than 0".to_string()));
        }
        for partition in &self.tracked_partitions {
            partition
                .validate()
                .map_err(|e| ServerError::Config(e.to_string()))?;
        }
        Ok(())
    }
}
