//! Authoritative rank storage port.
//!
//! The relational store is an external collaborator. [`RankStore`] is the
//! narrow surface the ranking services need from it; [`InMemoryRankStore`] is
//! the adapter used by tests and single-node deployments.

use crate::error::StoreError;
use crate::types::{standing_order, PartitionKey, PlayerId, RankEntry, RankUpdate};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

/// Storage operations the ranking subsystem depends on.
#[async_trait]
pub trait RankStore: Send + Sync {
    /// Every active entry of a partition, in no particular order.
    async fn find_active_entries(&self, partition: &PartitionKey) -> Result<Vec<RankEntry>, StoreError>;

    /// A window of active entries ordered by the standing tie-break chain.
    async fn find_active_page(
        &self,
        partition: &PartitionKey,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<RankEntry>, StoreError>;

    async fn count_active(&self, partition: &PartitionKey) -> Result<u64, StoreError>;

    /// Looks up an entry regardless of its active flag.
    async fn find_entry(
        &self,
        player_id: PlayerId,
        partition: &PartitionKey,
    ) -> Result<Option<RankEntry>, StoreError>;

    /// Writes rank fields for a whole partition. All-or-nothing.
    async fn batch_update_ranks(
        &self,
        partition: &PartitionKey,
        updates: &[RankUpdate],
    ) -> Result<(), StoreError>;

    async fn insert_entry(&self, entry: RankEntry) -> Result<(), StoreError>;

    /// Writes the match-derived columns of an entry.
    ///
    /// Rank columns are owned by the sweep and left untouched.
    async fn save_match_stats(&self, entry: &RankEntry) -> Result<(), StoreError>;

    /// Flips the active flag. Returns `false` when no entry exists.
    async fn set_active(
        &self,
        player_id: PlayerId,
        partition: &PartitionKey,
        active: bool,
    ) -> Result<bool, StoreError>;
}

/// In-memory [`RankStore`].
///
/// Availability can be toggled to simulate a store outage.
#[derive(Debug, Default)]
pub struct InMemoryRankStore {
    partitions: RwLock<HashMap<PartitionKey, HashMap<PlayerId, RankEntry>>>,
    unavailable: AtomicBool,
    queries: AtomicU64,
}

impl InMemoryRankStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the store going down (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of read queries served so far.
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }
        Ok(())
    }

    fn check_read(&self) -> Result<(), StoreError> {
        self.check()?;
        self.queries.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl RankStore for InMemoryRankStore {
    async fn find_active_entries(&self, partition: &PartitionKey) -> Result<Vec<RankEntry>, StoreError> {
        self.check_read()?;
        let partitions = self.partitions.read().await;
        Ok(partitions
            .get(partition)
            .map(|rows| rows.values().filter(|e| e.active).cloned().collect())
            .unwrap_or_default())
    }

    async fn find_active_page(
        &self,
        partition: &PartitionKey,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<RankEntry>, StoreError> {
        self.check_read()?;
        let partitions = self.partitions.read().await;
        let mut rows: Vec<RankEntry> = partitions
            .get(partition)
            .map(|rows| rows.values().filter(|e| e.active).cloned().collect())
            .unwrap_or_default();
        rows.sort_by(standing_order);

        Ok(rows
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn count_active(&self, partition: &PartitionKey) -> Result<u64, StoreError> {
        self.check_read()?;
        let partitions = self.partitions.read().await;
        Ok(partitions
            .get(partition)
            .map(|rows| rows.values().filter(|e| e.active).count() as u64)
            .unwrap_or(0))
    }

    async fn find_entry(
        &self,
        player_id: PlayerId,
        partition: &PartitionKey,
    ) -> Result<Option<RankEntry>, StoreError> {
        self.check_read()?;
        let partitions = self.partitions.read().await;
        Ok(partitions.get(partition).and_then(|rows| rows.get(&player_id)).cloned())
    }

    async fn batch_update_ranks(
        &self,
        partition: &PartitionKey,
        updates: &[RankUpdate],
    ) -> Result<(), StoreError> {
        self.check()?;
        let mut partitions = self.partitions.write().await;
        let rows = partitions
            .get_mut(partition)
            .ok_or_else(|| StoreError::BatchRejected(format!("unknown partition {partition}")))?;

        // Validate the whole batch before touching any row.
        if let Some(missing) = updates.iter().find(|u| !rows.contains_key(&u.player_id)) {
            return Err(StoreError::BatchRejected(format!(
                "no entry for player {} in {partition}",
                missing.player_id
            )));
        }

        for update in updates {
            if let Some(row) = rows.get_mut(&update.player_id) {
                row.rank = update.rank;
                row.previous_rank = update.previous_rank;
                row.rank_change = update.rank_change;
            }
        }
        debug!("💾 Applied {} rank updates to {}", updates.len(), partition);
        Ok(())
    }

    async fn insert_entry(&self, entry: RankEntry) -> Result<(), StoreError> {
        self.check()?;
        let mut partitions = self.partitions.write().await;
        let rows = partitions.entry(entry.partition()).or_default();
        if rows.contains_key(&entry.player_id) {
            return Err(StoreError::Duplicate(entry.player_id));
        }
        rows.insert(entry.player_id, entry);
        Ok(())
    }

    async fn save_match_stats(&self, entry: &RankEntry) -> Result<(), StoreError> {
        self.check()?;
        let mut partitions = self.partitions.write().await;
        let row = partitions
            .get_mut(&entry.partition())
            .and_then(|rows| rows.get_mut(&entry.player_id))
            .ok_or(StoreError::Missing(entry.player_id))?;

        row.rating = entry.rating;
        row.wins = entry.wins;
        row.losses = entry.losses;
        row.draws = entry.draws;
        row.matches_played = entry.matches_played;
        row.win_rate = entry.win_rate;
        row.current_streak = entry.current_streak;
        row.peak_rating = entry.peak_rating;
        row.lowest_rating = entry.lowest_rating;
        row.last_match_at = entry.last_match_at;
        Ok(())
    }

    async fn set_active(
        &self,
        player_id: PlayerId,
        partition: &PartitionKey,
        active: bool,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let mut partitions = self.partitions.write().await;
        match partitions.get_mut(partition).and_then(|rows| rows.get_mut(&player_id)) {
            Some(row) => {
                row.active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
