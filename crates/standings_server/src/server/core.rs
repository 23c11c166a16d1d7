//! Core standings server implementation.
//!
//! `StandingsServer` is the composition root: it builds the cache, bus,
//! ranking service, broadcaster, relay and connection registry from the
//! injected transports and wires them together. Nothing in the process holds
//! authoritative ranking state; every instance can be killed and replaced.

use super::scheduler::spawn_sweep_scheduler;
use crate::config::ServerConfig;
use crate::connection::ConnectionRegistry;
use crate::error::ServerError;
use crate::messaging::route_client_message;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use standings_core::{
    leaderboard_room, BroadcastOutcome, BroadcastStats, Broadcaster, BusEvent, BusHealth, BusStats, CacheStats, CacheTransport,
    ConnectionId, EventBus, FleetRelay, InMemoryBusHub, InMemoryCacheTransport, InMemoryRankStore,
    InstanceNotice, MatchResult, MessageBus, PartitionKey, PlayerId, RankCache, RankEntry, RankNotifications,
    RankService, RankStore, RankingError, SubscriptionId, SweepReport,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// External collaborators a server is built on.
pub struct Transports {
    pub store: Arc<dyn RankStore>,
    pub cache: Arc<dyn CacheTransport>,
    pub bus: Arc<dyn MessageBus>,
}

impl Transports {
    /// Self-contained in-memory transports for a single process.
    pub fn in_memory() -> Self {
        let hub = InMemoryBusHub::new();
        Self {
            store: Arc::new(InMemoryRankStore::new()),
            cache: Arc::new(InMemoryCacheTransport::new()),
            bus: Arc::new(hub.connect()),
        }
    }
}

/// Sweep and broadcast result for one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refresh {
    pub sweep: SweepReport,
    pub broadcast: BroadcastOutcome,
}

/// Result of [`StandingsServer::complete_match`].
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCompletion {
    /// Updated entries, in the order of the submitted results.
    pub entries: Vec<RankEntry>,
    /// One refresh per partition the match touched.
    pub refreshes: Vec<Refresh>,
}

/// Point-in-time view of every component's counters.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStats {
    pub instance_id: String,
    pub connections: usize,
    pub tracked_partitions: usize,
    pub cache: CacheStats,
    pub bus: BusStats,
    pub bus_health: BusHealth,
    pub broadcast: BroadcastStats,
}

/// The standings server.
///
/// # Lifecycle
///
/// 1. [`StandingsServer::new`] wires components from the transports
/// 2. [`StandingsServer::start`] subscribes to the bus, announces the instance
///    and starts the sweep scheduler
/// 3. [`StandingsServer::shutdown`] stops the scheduler, announces the
///    departure and drops every bus subscription
pub struct StandingsServer {
    config: ServerConfig,
    ranks: Arc<RankService>,
    bus: Arc<EventBus>,
    broadcaster: Arc<Broadcaster>,
    relay: Arc<FleetRelay>,
    registry: Arc<ConnectionRegistry>,
    /// Tracked partitions and when they last saw activity.
    tracked: DashMap<PartitionKey, Instant>,
    running: AtomicBool,
    shutdown_sender: broadcast::Sender<()>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl StandingsServer {
    pub fn new(config: ServerConfig, transports: Transports) -> Arc<Self> {
        let cache = Arc::new(RankCache::new(transports.cache, config.cache.clone()));
        let ranks = Arc::new(RankService::new(transports.store, cache, config.ranking.clone()));
        let bus = EventBus::new(config.instance_id.clone(), transports.bus, config.retry);
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Arc::new(Broadcaster::new(
            ranks.clone(),
            bus.clone(),
            registry.clone(),
            config.broadcast.clone(),
        ));
        let relay = FleetRelay::new(broadcaster.clone(), registry.clone());
        let (shutdown_sender, _) = broadcast::channel(1);

        let tracked = DashMap::new();
        for partition in &config.tracked_partitions {
            tracked.insert(partition.clone(), Instant::now());
        }

        Arc::new(Self {
            config,
            ranks,
            bus,
            broadcaster,
            relay,
            registry,
            tracked,
            running: AtomicBool::new(false),
            shutdown_sender,
            scheduler: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    /// Joins the fleet.
    pub async fn start(self: &Arc<Self>) -> Result<(), ServerError> {
        self.config.validate()?;
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::Internal("Server already running".to_string()));
        }

        info!("🚀 Starting standings server {}", self.config.instance_id);

        let ids = match self.relay.attach(&self.bus).await {
            Ok(ids) => ids,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                self.bus.close().await;
                return Err(e.into());
            }
        };
        self.subscriptions.lock().await.extend(ids);

        self.announce(BusEvent::InstanceStarted(self.instance_notice())).await;

        if self.config.sweep_interval.is_zero() {
            info!("⏸️ Sweep scheduler disabled (interval: 0)");
        } else {
            let handle = spawn_sweep_scheduler(
                Arc::downgrade(self),
                self.config.sweep_interval,
                self.shutdown_sender.subscribe(),
            );
            *self.scheduler.lock().await = Some(handle);
            info!("🕒 Sweep scheduler started with interval: {:?}", self.config.sweep_interval);
        }

        info!("✅ Standings server {} ready", self.config.instance_id);
        Ok(())
    }

    /// Leaves the fleet. Calling it on a stopped server is a no-op.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        info!("🛑 Shutting down standings server {}", self.config.instance_id);

        let _ = self.shutdown_sender.send(());
        if let Some(handle) = self.scheduler.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("⚠️ Sweep scheduler ended abnormally: {}", e);
            }
        }

        self.announce(BusEvent::InstanceStopping(self.instance_notice())).await;

        self.subscriptions.lock().await.clear();
        self.bus.close().await;
        info!("👋 Standings server {} stopped", self.config.instance_id);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Client connections
    // ========================================================================

    /// Registers a client connection; pushes arrive on the receiver.
    pub fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<String>) {
        self.registry.register()
    }

    pub fn disconnect(&self, connection_id: ConnectionId) {
        self.registry.unregister(connection_id);
    }

    pub async fn handle_client_message(&self, connection_id: ConnectionId, text: &str) -> Result<(), ServerError> {
        route_client_message(text, connection_id, &self.registry, &self.broadcaster).await
    }

    // ========================================================================
    // Ranking flow
    // ========================================================================

    /// Creates the player's entry on first activity and tracks the partition.
    pub async fn register_player(
        &self,
        player_id: PlayerId,
        partition: &PartitionKey,
        account_created_at: DateTime<Utc>,
    ) -> Result<RankEntry, ServerError> {
        let entry = self.ranks.ensure_entry(player_id, partition, account_created_at).await?;
        self.track(partition.clone());
        Ok(entry)
    }

    /// Applies every participant's result, then re-sweeps and broadcasts each
    /// touched partition once.
    pub async fn complete_match(&self, results: &[MatchResult]) -> Result<MatchCompletion, ServerError> {
        if results.is_empty() {
            return Err(RankingError::InvalidArgument("match has no results".to_string()).into());
        }

        let mut entries = Vec::with_capacity(results.len());
        let mut partitions: Vec<PartitionKey> = Vec::new();
        for result in results {
            entries.push(self.ranks.record_match(result).await?);

            let partition = result.partition();
            self.track(partition.clone());
            if !partitions.contains(&partition) {
                partitions.push(partition);
            }
            self.publish_and_deliver(BusEvent::MatchCompleted(result.clone())).await;
        }

        let mut refreshes = Vec::with_capacity(partitions.len());
        for partition in &partitions {
            refreshes.push(self.refresh(partition).await?);
        }

        Ok(MatchCompletion { entries, refreshes })
    }

    /// Sweeps a partition, notifies movers and triggers a broadcast.
    pub async fn refresh(&self, partition: &PartitionKey) -> Result<Refresh, ServerError> {
        let sweep = self.ranks.recalculate(partition).await?;

        if !sweep.moved.is_empty() {
            let notice = RankNotifications {
                scope: partition.scope.clone(),
                season_id: partition.season_id.clone(),
                updates: sweep.moved.clone(),
            };
            self.publish_and_deliver(BusEvent::RankChanged(notice)).await;
        }

        let broadcast = self.broadcaster.trigger(partition).await;
        Ok(Refresh { sweep, broadcast })
    }

    /// Refreshes every tracked partition, returning how many succeeded.
    ///
    /// Runtime partitions idle past `idle_partition_ttl`, or left with no
    /// active entries, are untracked once no local client watches them.
    pub async fn sweep_all(&self) -> usize {
        let mut refreshed = 0;
        for partition in self.tracked_partitions() {
            if self.evictable(&partition) && self.idle_for(&partition) >= self.config.idle_partition_ttl {
                self.untrack(&partition);
                continue;
            }
            match self.refresh(&partition).await {
                Ok(refresh) => {
                    refreshed += 1;
                    if refresh.sweep.ranked == 0 && self.evictable(&partition) {
                        self.untrack(&partition);
                    }
                }
                Err(e) => error!("❌ Scheduled sweep of {} failed: {}", partition, e),
            }
        }
        self.broadcaster.prune_throttle();
        refreshed
    }

    /// Tracks `partition` and marks it active now.
    pub fn track(&self, partition: PartitionKey) {
        self.tracked.insert(partition, Instant::now());
    }

    /// Tracked partitions, sorted.
    pub fn tracked_partitions(&self) -> Vec<PartitionKey> {
        let mut partitions: Vec<PartitionKey> = self.tracked.iter().map(|p| p.key().clone()).collect();
        partitions.sort();
        partitions
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn instance_id(&self) -> &str {
        &self.config.instance_id
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn ranks(&self) -> Arc<RankService> {
        self.ranks.clone()
    }

    pub fn broadcaster(&self) -> Arc<Broadcaster> {
        self.broadcaster.clone()
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    pub async fn stats(&self) -> ServerStats {
        ServerStats {
            instance_id: self.config.instance_id.clone(),
            connections: self.registry.connection_count(),
            tracked_partitions: self.tracked.len(),
            cache: self.ranks.cache().stats(),
            bus: self.bus.stats(),
            bus_health: self.bus.health().await,
            broadcast: self.broadcaster.stats(),
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn evictable(&self, partition: &PartitionKey) -> bool {
        !self.config.idle_partition_ttl.is_zero()
            && !self.config.tracked_partitions.contains(partition)
            && self.registry.room_size(&leaderboard_room(partition)) == 0
    }

    fn idle_for(&self, partition: &PartitionKey) -> std::time::Duration {
        self.tracked
            .get(partition)
            .map(|last| last.elapsed())
            .unwrap_or_default()
    }

    fn untrack(&self, partition: &PartitionKey) {
        self.tracked.remove(partition);
        self.ranks.forget(partition);
        self.broadcaster.forget(partition);
        info!("🧹 Stopped tracking idle leaderboard {}", partition);
    }

    fn instance_notice(&self) -> InstanceNotice {
        InstanceNotice {
            instance_id: self.config.instance_id.clone(),
            scopes: self.tracked_partitions().into_iter().map(|p| p.scope).collect(),
        }
    }

    /// Delivers an event to local rooms, then to the rest of the fleet.
    async fn publish_and_deliver(&self, event: BusEvent) {
        self.relay.deliver(&event).await;
        if let Err(e) = self.bus.emit(&event).await {
            warn!("⚠️ Dropped {} after retries: {}", event.event_type().as_str(), e);
        }
    }

    async fn announce(&self, event: BusEvent) {
        if let Err(e) = self.bus.emit(&event).await {
            warn!("⚠️ Could not announce {}: {}", event.event_type().as_str(), e);
        }
    }
}
