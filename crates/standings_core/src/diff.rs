//! Leaderboard diff engine
//!
//! Compares the last broadcast snapshot of a partition with its current top-N
//! and emits only the rows a client needs to update.
//!
//! Per current entry:
//! 1. No previous snapshot at all: every entry is `new`
//! 2. Entry absent from the previous snapshot: `new`
//! 3. Rank differs: `up` or `down`, carrying both ranks
//! 4. Same rank, different rating: `unchanged`, still emitted so the client
//!    refreshes the rating
//! 5. Same rank and rating: omitted
//!
//! Entries that fell out of the top-N produce no change row; the `topN` list
//! carried next to the changes is authoritative for membership.

use crate::types::{LeaderboardSnapshot, Movement, PlayerId, RankChange, SnapshotEntry};
use std::collections::HashMap;

/// Computes the minimal change set between `previous` and `current`.
///
/// Output follows the order of `current`.
pub fn compute_diff(previous: Option<&LeaderboardSnapshot>, current: &[SnapshotEntry]) -> Vec<RankChange> {
    let Some(previous) = previous else {
        return current
            .iter()
            .map(|entry| RankChange {
                player_id: entry.player_id,
                previous_rank: None,
                current_rank: entry.rank,
                movement: Movement::New,
            })
            .collect();
    };

    let before: HashMap<PlayerId, &SnapshotEntry> =
        previous.entries.iter().map(|e| (e.player_id, e)).collect();

    current
        .iter()
        .filter_map(|entry| {
            let Some(old) = before.get(&entry.player_id) else {
                return Some(RankChange {
                    player_id: entry.player_id,
                    previous_rank: None,
                    current_rank: entry.rank,
                    movement: Movement::New,
                });
            };

            let movement = if entry.rank < old.rank {
                Movement::Up
            } else if entry.rank > old.rank {
                Movement::Down
            } else if entry.rating != old.rating {
                Movement::Unchanged
            } else {
                return None;
            };

            Some(RankChange {
                player_id: entry.player_id,
                previous_rank: Some(old.rank),
                current_rank: entry.rank,
                movement,
            })
        })
        .collect()
}
