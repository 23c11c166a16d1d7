//! # Leaderboard Broadcaster
//!
//! Decides when a partition's leaderboard is recomputed and pushed.
//!
//! Each trigger walks the cycle
//! `Idle → Pending → (Throttled | Computing) → Publishing → Idle`:
//!
//! - **Pending**: the trigger is checked against the throttle window
//! - **Throttled**: a cycle ran for this partition inside the window; the
//!   trigger is dropped
//! - **Computing**: fetch the top-N, diff it against the stored snapshot,
//!   replace the snapshot
//! - **Publishing**: emit the diff to local connections, then publish it on
//!   the bus for every other process
//!
//! Failures end the cycle (back to `Idle`) and are logged, never retried. The
//! next trigger or scheduled sweep repairs the miss.
//!
//! [`Broadcaster::phase`] reports the cycle holding the partition's lock.
//! Triggers still pending or throttled never overwrite it.
//!
//! Diffs received from other processes only ever go to local rooms. They are
//! never re-published, but they replace the local snapshot when newer, so a
//! client joining here sees what the fleet last pushed.

use crate::bus::EventBus;
use crate::cache::keys;
use crate::diff::compute_diff;
use crate::events::BusEvent;
use crate::rank_service::RankService;
use crate::rooms::{client_events, leaderboard_room, RoomBroadcaster};
use crate::throttle::Throttle;
use crate::types::{
    current_timestamp_ms, LeaderboardDiff, LeaderboardSnapshot, PartitionKey, SnapshotEntry, TopEntry,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcasterConfig {
    /// Minimum spacing between two accepted cycles of one partition.
    pub throttle_window: Duration,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            throttle_window: Duration::from_secs(1),
        }
    }
}

/// Where a partition currently is in its broadcast cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastPhase {
    Idle,
    Pending,
    Throttled,
    Computing,
    Publishing,
}

/// How a trigger ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// Dropped inside the throttle window.
    Throttled,
    /// Computed, but nothing changed since the last snapshot.
    Unchanged,
    Published {
        changes: usize,
        /// Local connections reached.
        delivered: usize,
        /// Whether the bus publish succeeded.
        relayed: bool,
    },
    /// The top-N could not be fetched.
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastStats {
    pub triggers: u64,
    pub throttled: u64,
    pub unchanged: u64,
    pub published: u64,
    pub failed: u64,
    /// Cycles whose bus publish was dropped after exhausting retries.
    pub relay_failures: u64,
    /// Diffs from other processes delivered to local rooms.
    pub remote_deliveries: u64,
    /// Partitions with a snapshot held in memory.
    pub partitions: usize,
}

#[derive(Debug, Default)]
struct BroadcastCounters {
    triggers: AtomicU64,
    throttled: AtomicU64,
    unchanged: AtomicU64,
    published: AtomicU64,
    failed: AtomicU64,
    relay_failures: AtomicU64,
    remote_deliveries: AtomicU64,
}

pub struct Broadcaster {
    ranks: Arc<RankService>,
    bus: Arc<EventBus>,
    rooms: Arc<dyn RoomBroadcaster>,
    throttle: Throttle,
    snapshots: DashMap<PartitionKey, LeaderboardSnapshot>,
    phases: DashMap<PartitionKey, BroadcastPhase>,
    cycle_locks: DashMap<PartitionKey, Arc<Mutex<()>>>,
    counters: BroadcastCounters,
}

impl Broadcaster {
    pub fn new(
        ranks: Arc<RankService>,
        bus: Arc<EventBus>,
        rooms: Arc<dyn RoomBroadcaster>,
        config: BroadcasterConfig,
    ) -> Self {
        Self {
            ranks,
            bus,
            rooms,
            throttle: Throttle::new(config.throttle_window),
            snapshots: DashMap::new(),
            phases: DashMap::new(),
            cycle_locks: DashMap::new(),
            counters: BroadcastCounters::default(),
        }
    }

    pub fn phase(&self, partition: &PartitionKey) -> BroadcastPhase {
        self.phases.get(partition).map(|p| *p).unwrap_or(BroadcastPhase::Idle)
    }

    /// Only called by the cycle holding the partition's lock.
    fn enter(&self, partition: &PartitionKey, phase: BroadcastPhase) {
        debug!("Broadcast {} -> {:?}", partition, phase);
        self.phases.insert(partition.clone(), phase);
    }

    /// Requests a broadcast cycle for `partition`.
    pub async fn trigger(&self, partition: &PartitionKey) -> BroadcastOutcome {
        self.counters.triggers.fetch_add(1, Ordering::Relaxed);
        debug!("Broadcast trigger for {} is {:?}", partition, BroadcastPhase::Pending);

        if !self.throttle.try_acquire(&throttle_key(partition)) {
            self.counters.throttled.fetch_add(1, Ordering::Relaxed);
            debug!("Broadcast trigger for {} is {:?}", partition, BroadcastPhase::Throttled);
            return BroadcastOutcome::Throttled;
        }

        let lock = self
            .cycle_locks
            .entry(partition.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _cycle = lock.lock().await;

        let outcome = self.run_cycle(partition).await;
        self.phases.remove(partition);
        debug!("Broadcast {} -> {:?}", partition, BroadcastPhase::Idle);
        outcome
    }

    /// Drops everything held for a partition that is no longer tracked.
    ///
    /// A cycle running right now keeps its lock and phase.
    pub fn forget(&self, partition: &PartitionKey) {
        self.snapshots.remove(partition);
        self.cycle_locks.remove_if(partition, |_, lock| Arc::strong_count(lock) == 1);
        self.throttle.reset(&throttle_key(partition));
    }

    /// Drops throttle timestamps old enough that they no longer throttle.
    pub fn prune_throttle(&self) {
        self.throttle.prune(self.throttle.window());
    }

    async fn run_cycle(&self, partition: &PartitionKey) -> BroadcastOutcome {
        // ====================================================================
        // Computing
        // ====================================================================
        self.enter(partition, BroadcastPhase::Computing);

        let top = match self.ranks.top(partition).await {
            Ok(top) => top,
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!("❌ Broadcast for {} failed to load top entries: {}", partition, e);
                return BroadcastOutcome::Failed(e.to_string());
            }
        };

        let current: Vec<SnapshotEntry> = top.iter().map(SnapshotEntry::from).collect();
        let previous = self.snapshot(partition).await;
        let changes = compute_diff(previous.as_ref(), &current);
        let timestamp = current_timestamp_ms();

        self.store_snapshot(LeaderboardSnapshot {
            scope: partition.scope.clone(),
            season_id: partition.season_id.clone(),
            entries: current,
            captured_at: timestamp,
        })
        .await;

        if changes.is_empty() {
            self.counters.unchanged.fetch_add(1, Ordering::Relaxed);
            debug!("Leaderboard {} unchanged; nothing to push", partition);
            return BroadcastOutcome::Unchanged;
        }

        // ====================================================================
        // Publishing
        // ====================================================================
        self.enter(partition, BroadcastPhase::Publishing);

        let diff = LeaderboardDiff {
            scope: partition.scope.clone(),
            season_id: partition.season_id.clone(),
            top_n: top.iter().map(TopEntry::from).collect(),
            changes,
            timestamp,
        };
        let change_count = diff.changes.len();
        let delivered = self.emit_local(&diff).await;

        let relayed = match self.bus.emit(&BusEvent::LeaderboardUpdate(diff)).await {
            Ok(()) => true,
            Err(e) => {
                self.counters.relay_failures.fetch_add(1, Ordering::Relaxed);
                warn!("⚠️ Leaderboard update for {} not relayed to other instances: {}", partition, e);
                false
            }
        };

        self.counters.published.fetch_add(1, Ordering::Relaxed);
        info!(
            "📣 Broadcast {}: {} changes, {} local connections, relayed: {}",
            partition, change_count, delivered, relayed
        );
        BroadcastOutcome::Published {
            changes: change_count,
            delivered,
            relayed,
        }
    }

    /// Delivers a diff published by another process to local rooms only.
    pub async fn deliver_remote(&self, diff: &LeaderboardDiff) -> usize {
        self.counters.remote_deliveries.fetch_add(1, Ordering::Relaxed);
        self.adopt_remote(diff);
        self.emit_local(diff).await
    }

    /// Takes a remote diff's top-N as the local snapshot unless ours is newer.
    fn adopt_remote(&self, diff: &LeaderboardDiff) {
        let snapshot = LeaderboardSnapshot {
            scope: diff.scope.clone(),
            season_id: diff.season_id.clone(),
            entries: diff.top_n.iter().map(SnapshotEntry::from).collect(),
            captured_at: diff.timestamp,
        };
        match self.snapshots.entry(diff.partition()) {
            Entry::Occupied(current) if current.get().captured_at > snapshot.captured_at => {
                debug!("Ignoring stale remote snapshot for {}", current.key());
            }
            Entry::Occupied(mut current) => {
                current.insert(snapshot);
            }
            Entry::Vacant(slot) => {
                slot.insert(snapshot);
            }
        }
    }

    async fn emit_local(&self, diff: &LeaderboardDiff) -> usize {
        let room = leaderboard_room(&diff.partition());
        match serde_json::to_value(diff) {
            Ok(payload) => {
                self.rooms
                    .emit_to_room(&room, client_events::LEADERBOARD_UPDATE, &payload)
                    .await
            }
            Err(e) => {
                error!("❌ Could not encode leaderboard diff for {}: {}", room, e);
                0
            }
        }
    }

    /// Last broadcast snapshot of `partition`.
    ///
    /// Falls back to the copy persisted in the shared cache, so a fresh
    /// process diffs against what the fleet last pushed.
    pub async fn snapshot(&self, partition: &PartitionKey) -> Option<LeaderboardSnapshot> {
        if let Some(snapshot) = self.snapshots.get(partition) {
            return Some(snapshot.clone());
        }

        let persisted = self
            .ranks
            .cache()
            .get::<LeaderboardSnapshot>(&keys::snapshot(partition))
            .await
            .into_option()?;
        self.snapshots.insert(partition.clone(), persisted.clone());
        debug!("Restored leaderboard snapshot for {} from cache", partition);
        Some(persisted)
    }

    async fn store_snapshot(&self, snapshot: LeaderboardSnapshot) {
        let partition = snapshot.partition();
        let cache = self.ranks.cache();
        cache
            .set(&keys::snapshot(&partition), &snapshot, cache.config().snapshot_ttl)
            .await;
        self.snapshots.insert(partition, snapshot);
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            triggers: self.counters.triggers.load(Ordering::Relaxed),
            throttled: self.counters.throttled.load(Ordering::Relaxed),
            unchanged: self.counters.unchanged.load(Ordering::Relaxed),
            published: self.counters.published.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            relay_failures: self.counters.relay_failures.load(Ordering::Relaxed),
            remote_deliveries: self.counters.remote_deliveries.load(Ordering::Relaxed),
            partitions: self.snapshots.len(),
        }
    }
}

fn throttle_key(partition: &PartitionKey) -> String {
    format!("scope:{partition}")
}
