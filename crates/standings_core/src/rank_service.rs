//! # Rank Service
//!
//! Per-partition ranking queries and the recalculation sweep.
//!
//! Reads go through [`RankCache`] first and fall back to the [`RankStore`],
//! writing the result back. [`RankService::recalculate`] is the only code that
//! writes rank values: it re-sorts the whole partition, commits the new ranks
//! in one atomic batch and drops every cached view of the partition.
//!
//! Sweeps of the same partition are serialized inside a process. Nothing
//! coordinates sweeps across processes; the later commit wins and the next
//! sweep repairs any interleaving. Reads never wait on a sweep.

use crate::cache::{keys, RankCache};
use crate::error::{RankingError, StoreError};
use crate::store::RankStore;
use crate::types::{
    percentile, standing_order, MatchResult, PartitionKey, PlayerId, PlayerRank, RankEntry, RankPage,
    RankUpdate,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankServiceConfig {
    /// Page size used when a caller passes `0`.
    pub default_page_size: u32,
    /// Larger page requests are clamped to this.
    pub max_page_size: u32,
    /// Rows in a broadcast leaderboard.
    pub top_n: u32,
    /// Rating given to a player on first activity in a partition.
    pub default_rating: i32,
}

impl Default for RankServiceConfig {
    fn default() -> Self {
        Self {
            default_page_size: 50,
            max_page_size: 100,
            top_n: 10,
            default_rating: 1200,
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub partition: PartitionKey,
    /// Active entries that received a rank.
    pub ranked: usize,
    /// Entries whose rank changed from a previous non-zero rank.
    pub moved: Vec<RankUpdate>,
    pub elapsed: Duration,
}

pub struct RankService {
    store: Arc<dyn RankStore>,
    cache: Arc<RankCache>,
    config: RankServiceConfig,
    sweep_locks: DashMap<PartitionKey, Arc<Mutex<()>>>,
    match_locks: DashMap<PartitionKey, Arc<Mutex<()>>>,
}

/// The partition's mutex from `locks`, created on first use.
fn partition_lock(locks: &DashMap<PartitionKey, Arc<Mutex<()>>>, partition: &PartitionKey) -> Arc<Mutex<()>> {
    locks
        .entry(partition.clone())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

impl RankService {
    pub fn new(store: Arc<dyn RankStore>, cache: Arc<RankCache>, config: RankServiceConfig) -> Self {
        Self {
            store,
            cache,
            config,
            sweep_locks: DashMap::new(),
            match_locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RankServiceConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<RankCache> {
        &self.cache
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// One page of standings. `page` is 1-based; `page_size` is clamped.
    pub async fn get_page(
        &self,
        partition: &PartitionKey,
        page: u32,
        page_size: u32,
    ) -> Result<RankPage, RankingError> {
        partition.validate()?;
        let page = page.max(1);
        let page_size = match page_size {
            0 => self.config.default_page_size,
            n => n.min(self.config.max_page_size),
        };

        let key = keys::page(partition, page, page_size);
        if let Some(cached) = self.cache.get::<RankPage>(&key).await.into_option() {
            return Ok(cached);
        }

        let offset = u64::from(page - 1) * u64::from(page_size);
        let entries = self.store.find_active_page(partition, offset, page_size).await?;
        let total = self.total(partition).await?;

        let result = RankPage {
            entries,
            total,
            page,
            page_size,
        };
        self.cache.set(&key, &result, self.cache.ttl_for(&partition.scope)).await;
        debug!("Served page {} of {} from store", page, partition);
        Ok(result)
    }

    /// The top of the partition as broadcast to clients.
    pub async fn top(&self, partition: &PartitionKey) -> Result<Vec<RankEntry>, RankingError> {
        Ok(self.get_page(partition, 1, self.config.top_n).await?.entries)
    }

    pub async fn get_player_rank(
        &self,
        player_id: PlayerId,
        partition: &PartitionKey,
    ) -> Result<PlayerRank, RankingError> {
        partition.validate()?;
        let key = keys::player(partition, player_id);
        if let Some(cached) = self.cache.get::<PlayerRank>(&key).await.into_option() {
            return Ok(cached);
        }

        let entry = self.active_entry(player_id, partition).await?;
        let total = self.total(partition).await?;
        let result = PlayerRank {
            rank: entry.rank,
            total,
            percentile: percentile(entry.rank, total),
            rating: entry.rating,
        };

        self.cache.set(&key, &result, self.cache.ttl_for(&partition.scope)).await;
        Ok(result)
    }

    async fn total(&self, partition: &PartitionKey) -> Result<u64, RankingError> {
        let key = keys::total(partition);
        if let Some(total) = self.cache.get::<u64>(&key).await.into_option() {
            return Ok(total);
        }
        let total = self.store.count_active(partition).await?;
        self.cache.set(&key, &total, self.cache.ttl_for(&partition.scope)).await;
        Ok(total)
    }

    async fn active_entry(&self, player_id: PlayerId, partition: &PartitionKey) -> Result<RankEntry, RankingError> {
        match self.store.find_entry(player_id, partition).await? {
            Some(entry) if entry.active => Ok(entry),
            _ => Err(RankingError::EntryNotFound {
                player_id,
                partition: partition.to_string(),
            }),
        }
    }

    // ========================================================================
    // Sweep
    // ========================================================================

    /// Re-ranks every active entry of the partition.
    pub async fn recalculate(&self, partition: &PartitionKey) -> Result<SweepReport, RankingError> {
        partition.validate()?;
        let lock = partition_lock(&self.sweep_locks, partition);
        let _guard = lock.lock().await;
        let started = Instant::now();

        let mut entries = self.store.find_active_entries(partition).await?;
        entries.sort_by(standing_order);

        let updates: Vec<RankUpdate> = entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let rank = index as u32 + 1;
                let previous_rank = entry.rank;
                let rank_change = if previous_rank == 0 {
                    0
                } else {
                    previous_rank as i32 - rank as i32
                };
                RankUpdate {
                    player_id: entry.player_id,
                    rank,
                    previous_rank,
                    rank_change,
                }
            })
            .collect();

        if !updates.is_empty() {
            self.store.batch_update_ranks(partition, &updates).await?;
        }
        self.cache.invalidate_partition(partition).await;

        let moved: Vec<RankUpdate> = updates.iter().filter(|u| u.rank_change != 0).copied().collect();
        let report = SweepReport {
            partition: partition.clone(),
            ranked: updates.len(),
            moved,
            elapsed: started.elapsed(),
        };

        info!(
            "🏆 Recalculated {}: {} ranked, {} moved in {:?}",
            partition,
            report.ranked,
            report.moved.len(),
            report.elapsed
        );
        Ok(report)
    }

    // ========================================================================
    // Entry lifecycle
    // ========================================================================

    /// Returns the player's entry, creating an unranked one on first activity.
    ///
    /// A deactivated entry is reactivated.
    pub async fn ensure_entry(
        &self,
        player_id: PlayerId,
        partition: &PartitionKey,
        account_created_at: DateTime<Utc>,
    ) -> Result<RankEntry, RankingError> {
        partition.validate()?;
        match self.store.find_entry(player_id, partition).await? {
            Some(entry) if entry.active => return Ok(entry),
            Some(mut entry) => {
                self.store.set_active(player_id, partition, true).await?;
                self.cache.invalidate_partition(partition).await;
                entry.active = true;
                info!("Reactivated player {} in {}", player_id, partition);
                return Ok(entry);
            }
            None => {}
        }

        let entry = RankEntry::new(player_id, partition, self.config.default_rating, account_created_at);
        match self.store.insert_entry(entry.clone()).await {
            Ok(()) => {
                self.cache.delete(&keys::total(partition)).await;
                debug!("Created entry for player {} in {}", player_id, partition);
                Ok(entry)
            }
            // Another request created it first.
            Err(StoreError::Duplicate(_)) => self.active_entry(player_id, partition).await,
            Err(e) => Err(e.into()),
        }
    }

    /// Applies a finished match to the player's entry.
    ///
    /// The new rating becomes visible in ranks after the next sweep. Matches
    /// of one partition are applied one at a time so concurrent results for
    /// the same player all land.
    pub async fn record_match(&self, result: &MatchResult) -> Result<RankEntry, RankingError> {
        let partition = result.partition();
        partition.validate()?;
        let lock = partition_lock(&self.match_locks, &partition);
        let _guard = lock.lock().await;

        let mut entry = self.active_entry(result.player_id, &partition).await?;
        entry.apply_match(result.outcome, result.rating_delta, result.played_at);

        self.store.save_match_stats(&entry).await?;
        self.cache.delete(&keys::player(&partition, result.player_id)).await;
        debug!(
            "Recorded match {} for player {} in {}: rating {}",
            result.match_id, result.player_id, partition, entry.rating
        );
        Ok(entry)
    }

    /// Removes the player from sweeps and rank lookups. The row is kept.
    pub async fn deactivate(&self, player_id: PlayerId, partition: &PartitionKey) -> Result<(), RankingError> {
        partition.validate()?;
        if !self.store.set_active(player_id, partition, false).await? {
            return Err(RankingError::EntryNotFound {
                player_id,
                partition: partition.to_string(),
            });
        }
        self.cache.invalidate_partition(partition).await;
        info!("Deactivated player {} in {}", player_id, partition);
        Ok(())
    }

    /// Drops the per-partition locks of a partition nobody is using.
    ///
    /// Locks currently held or awaited are kept.
    pub fn forget(&self, partition: &PartitionKey) {
        self.sweep_locks.remove_if(partition, |_, lock| Arc::strong_count(lock) == 1);
        self.match_locks.remove_if(partition, |_, lock| Arc::strong_count(lock) == 1);
    }
}
