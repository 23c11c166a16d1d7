//! Configuration management for the standings server.
//!
//! Loads the TOML configuration file, validates it and converts it into a
//! [`ServerConfig`].

use anyhow::Context;
use serde::{Deserialize, Serialize};
use standings_core::{
    BroadcasterConfig, CacheConfig, PartitionKey, RankServiceConfig, RetryPolicy, Scope, TtlTable,
};
use standings_server::ServerConfig;
use std::path::Path;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub bus: BusSettings,
    #[serde(default)]
    pub ranking: RankingSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Empty means "generate one at startup".
    #[serde(default)]
    pub instance_id: String,
    /// Leaderboards swept on every tick, e.g. `global` or `regional:eu/s4`.
    #[serde(default = "default_tracked")]
    pub tracked: Vec<String>,
    /// Zero disables scheduled sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Leaderboards picked up at runtime are dropped after this long without
    /// activity. Zero keeps them forever.
    #[serde(default = "default_idle_partition_ttl")]
    pub idle_partition_ttl_secs: u64,
}

fn default_tracked() -> Vec<String> {
    vec!["global".to_string()]
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_idle_partition_ttl() -> u64 {
    900
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub io_timeout_ms: u64,
    pub session_ttl_secs: u64,
    pub global_ttl_secs: u64,
    pub regional_ttl_secs: u64,
    pub snapshot_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            io_timeout_ms: 250,
            session_ttl_secs: 10,
            global_ttl_secs: 30,
            regional_ttl_secs: 60,
            snapshot_ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    pub max_publish_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            max_publish_attempts: 3,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingSettings {
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub top_n: u32,
    pub default_rating: i32,
    pub broadcast_throttle_ms: u64,
}

impl Default for RankingSettings {
    fn default() -> Self {
        Self {
            default_page_size: 50,
            max_page_size: 100,
            top_n: 10,
            default_rating: 1200,
            broadcast_throttle_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                instance_id: String::new(),
                tracked: default_tracked(),
                sweep_interval_secs: default_sweep_interval(),
                idle_partition_ttl_secs: default_idle_partition_ttl(),
            },
            cache: CacheSettings::default(),
            bus: BusSettings::default(),
            ranking: RankingSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl AppConfig {
    /// Reads the configuration, writing the defaults first if the file does
    /// not exist yet.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let config: AppConfig =
                toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        for tracked in &self.server.tracked {
            parse_partition(tracked)?;
        }

        if self.bus.max_publish_attempts == 0 {
            return Err("bus.max_publish_attempts must be at least 1".to_string());
        }
        if self.bus.retry_base_delay_ms > self.bus.retry_max_delay_ms {
            return Err("bus.retry_base_delay_ms must not exceed bus.retry_max_delay_ms".to_string());
        }
        if self.cache.io_timeout_ms == 0 {
            return Err("cache.io_timeout_ms must be greater than 0".to_string());
        }
        if self.ranking.max_page_size == 0 || self.ranking.default_page_size > self.ranking.max_page_size {
            return Err("ranking.default_page_size must be between 0 and a non-zero max_page_size".to_string());
        }
        if self.ranking.top_n == 0 || self.ranking.top_n > self.ranking.max_page_size {
            return Err(format!(
                "ranking.top_n must be between 1 and {}",
                self.ranking.max_page_size
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }

    pub fn to_server_config(&self) -> Result<ServerConfig, String> {
        let tracked_partitions = self
            .server
            .tracked
            .iter()
            .map(|p| parse_partition(p))
            .collect::<Result<Vec<_>, _>>()?;

        let mut config = ServerConfig {
            tracked_partitions,
            sweep_interval: Duration::from_secs(self.server.sweep_interval_secs),
            idle_partition_ttl: Duration::from_secs(self.server.idle_partition_ttl_secs),
            cache: CacheConfig {
                io_timeout: Duration::from_millis(self.cache.io_timeout_ms),
                ttl: TtlTable {
                    session: Duration::from_secs(self.cache.session_ttl_secs),
                    global: Duration::from_secs(self.cache.global_ttl_secs),
                    regional: Duration::from_secs(self.cache.regional_ttl_secs),
                },
                snapshot_ttl: Duration::from_secs(self.cache.snapshot_ttl_secs),
            },
            retry: RetryPolicy {
                max_attempts: self.bus.max_publish_attempts,
                base_delay: Duration::from_millis(self.bus.retry_base_delay_ms),
                max_delay: Duration::from_millis(self.bus.retry_max_delay_ms),
            },
            ranking: RankServiceConfig {
                default_page_size: self.ranking.default_page_size,
                max_page_size: self.ranking.max_page_size,
                top_n: self.ranking.top_n,
                default_rating: self.ranking.default_rating,
            },
            broadcast: BroadcasterConfig {
                throttle_window: Duration::from_millis(self.ranking.broadcast_throttle_ms),
            },
            ..ServerConfig::default()
        };
        if !self.server.instance_id.trim().is_empty() {
            config.instance_id = self.server.instance_id.clone();
        }
        Ok(config)
    }
}

/// Parses `scope` or `scope/season`.
fn parse_partition(raw: &str) -> Result<PartitionKey, String> {
    let (scope, season) = match raw.split_once('/') {
        Some((scope, "")) | Some((scope, "_")) => (scope, None),
        Some((scope, season)) => (scope, Some(season.to_string())),
        None => (raw, None),
    };
    let scope: Scope = scope
        .parse()
        .map_err(|e| format!("Invalid tracked leaderboard '{raw}': {e}"))?;
    let partition = PartitionKey::new(scope, season);
    partition
        .validate()
        .map_err(|e| format!("Invalid tracked leaderboard '{raw}': {e}"))?;
    Ok(partition)
}
