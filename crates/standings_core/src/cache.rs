//! # Rank Cache
//!
//! Cache-aside wrapper over a shared key-value cache.
//!
//! [`RankCache`] never lets a transport fault reach its caller: every failure
//! (unreachable cache, slow cache, corrupt payload) is logged, counted and
//! turned into a [`CacheLookup::Miss`] or a no-op. A cache outage costs
//! latency because callers fall back to the store, never correctness.
//!
//! Values are wrapped in a [`CacheEntry`] carrying its own TTL, so an entry is
//! treated as absent once that TTL elapses even if the transport's native
//! expiry has not evicted it yet.

use crate::error::CacheError;
use crate::types::{current_timestamp_ms, PartitionKey, PlayerId, Scope, ScopeKind};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

// ============================================================================
// Transport port
// ============================================================================

/// Raw key-value operations offered by the shared cache.
#[async_trait]
pub trait CacheTransport: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    /// Deletes every key starting with `prefix`, returning how many went.
    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, CacheError>;
}

/// In-memory [`CacheTransport`] with native expiry.
///
/// Share one instance between several [`RankCache`]s to model processes
/// talking to the same cache server.
#[derive(Debug, Default)]
pub struct InMemoryCacheTransport {
    entries: DashMap<String, (String, Instant)>,
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
}

impl InMemoryCacheTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the cache going down (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Adds artificial latency to every call.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.value().1 > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map(|e| e.value().1 > Instant::now())
            .unwrap_or(false)
    }

    async fn io(&self) -> Result<(), CacheError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheTransport for InMemoryCacheTransport {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.io().await?;
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.value().1 > now => return Ok(Some(entry.value().0.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.io().await?;
        self.entries.insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.io().await?;
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        self.io().await?;
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }
}

// ============================================================================
// Keys
// ============================================================================

/// Deterministic cache keys.
///
/// Everything derived from a partition's ranks lives under
/// [`partition_prefix`] so a sweep can drop it with one prefix delete.
/// Snapshots live outside that prefix and survive invalidation.
pub mod keys {
    use super::*;

    pub fn partition_prefix(partition: &PartitionKey) -> String {
        format!("rank/{}/{}/", partition.scope, partition.season_segment())
    }

    pub fn page(partition: &PartitionKey, page: u32, page_size: u32) -> String {
        format!("{}page/{}/{}", partition_prefix(partition), page, page_size)
    }

    pub fn player(partition: &PartitionKey, player_id: PlayerId) -> String {
        format!("{}player/{}", partition_prefix(partition), player_id)
    }

    pub fn total(partition: &PartitionKey) -> String {
        format!("{}total", partition_prefix(partition))
    }

    pub fn snapshot(partition: &PartitionKey) -> String {
        format!("leaderboard-snapshot/{}/{}", partition.scope, partition.season_segment())
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// TTL per scope kind, ordered short-to-long by volatility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlTable {
    pub session: Duration,
    pub global: Duration,
    pub regional: Duration,
}

impl Default for TtlTable {
    fn default() -> Self {
        Self {
            session: Duration::from_secs(10),
            global: Duration::from_secs(30),
            regional: Duration::from_secs(60),
        }
    }
}

impl TtlTable {
    pub fn for_scope(&self, scope: &Scope) -> Duration {
        match scope.kind() {
            ScopeKind::Session => self.session,
            ScopeKind::Global => self.global,
            ScopeKind::Regional => self.regional,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Budget for a single transport call before falling back to the store.
    pub io_timeout: Duration,
    pub ttl: TtlTable,
    /// How long a persisted leaderboard snapshot stays usable.
    pub snapshot_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            io_timeout: Duration::from_millis(250),
            ttl: TtlTable::default(),
            snapshot_ttl: Duration::from_secs(3600),
        }
    }
}

// ============================================================================
// Cache entries and lookups
// ============================================================================

/// A cached value with its own expiry metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub data: T,
    /// Epoch milliseconds.
    pub written_at: i64,
    pub ttl_seconds: u64,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T, ttl: Duration) -> Self {
        Self {
            data,
            written_at: current_timestamp_ms(),
            ttl_seconds: ttl.as_secs().max(1),
        }
    }

    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms - self.written_at >= (self.ttl_seconds as i64) * 1000
    }
}

/// Result of a cache read.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<T> {
    Hit(T),
    Miss,
}

impl<T> CacheLookup<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            CacheLookup::Hit(value) => Some(value),
            CacheLookup::Miss => None,
        }
    }
}

/// Point-in-time counters for a [`RankCache`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub deletes: u64,
    /// Transport faults absorbed by the cache.
    pub errors: u64,
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
}

// ============================================================================
// RankCache
// ============================================================================

/// Fault-absorbing cache-aside wrapper.
pub struct RankCache {
    transport: Arc<dyn CacheTransport>,
    config: CacheConfig,
    counters: CacheCounters,
}

impl RankCache {
    pub fn new(transport: Arc<dyn CacheTransport>, config: CacheConfig) -> Self {
        Self {
            transport,
            config,
            counters: CacheCounters::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn ttl_for(&self, scope: &Scope) -> Duration {
        self.config.ttl.for_scope(scope)
    }

    /// Reads and decodes `key`. Faults and expired entries read as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheLookup<T> {
        let raw = match self.guarded("get", key, self.transport.get(key)).await {
            Some(Some(raw)) => raw,
            _ => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return CacheLookup::Miss;
            }
        };

        let decoded = serde_json::from_str::<CacheEntry<T>>(&raw).map_err(|e| CacheError::Corrupt(e.to_string()));
        let Some(entry) = self.absorb("decode", key, decoded) else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            self.delete(key).await;
            return CacheLookup::Miss;
        };

        if entry.is_expired_at(current_timestamp_ms()) {
            debug!("Cache entry {} outlived its ttl", key);
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return CacheLookup::Miss;
        }

        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        CacheLookup::Hit(entry.data)
    }

    /// Encodes and stores `value` under `key`. Best effort.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let encoded = serde_json::to_string(&CacheEntry::new(value, ttl)).map_err(|e| CacheError::Corrupt(e.to_string()));
        let Some(raw) = self.absorb("encode", key, encoded) else {
            return;
        };

        if self.guarded("set", key, self.transport.set(key, raw, ttl)).await.is_some() {
            self.counters.writes.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub async fn delete(&self, key: &str) {
        if self.guarded("delete", key, self.transport.delete(key)).await.is_some() {
            self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub async fn delete_by_prefix(&self, prefix: &str) {
        if let Some(removed) = self
            .guarded("delete_by_prefix", prefix, self.transport.delete_by_prefix(prefix))
            .await
        {
            debug!("🧹 Invalidated {} cache keys under {}", removed, prefix);
            self.counters.deletes.fetch_add(removed, Ordering::Relaxed);
        }
    }

    /// Drops every rank-derived key of a partition.
    pub async fn invalidate_partition(&self, partition: &PartitionKey) {
        self.delete_by_prefix(&keys::partition_prefix(partition)).await;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }

    /// Runs a transport call under the I/O timeout, absorbing any failure.
    async fn guarded<R>(
        &self,
        op: &str,
        key: &str,
        call: impl Future<Output = Result<R, CacheError>>,
    ) -> Option<R> {
        let result = match tokio::time::timeout(self.config.io_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.config.io_timeout.as_millis() as u64)),
        };
        self.absorb(op, key, result)
    }

    /// Logs and counts a cache fault, turning it into `None`.
    fn absorb<R>(&self, op: &str, key: &str, result: Result<R, CacheError>) -> Option<R> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("⚠️ Cache {} on {} failed, continuing without cache: {}", op, key, e);
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }
}
