//! # Core Type Definitions
//!
//! Fundamental types shared by every component of the ranking subsystem.
//!
//! ## Key Types
//!
//! - [`PlayerId`] - Unique identifier for a ranked player
//! - [`Scope`] - A ranking partition (global, regional, per-session)
//! - [`PartitionKey`] - A `(scope, season)` pair; the unit of a sweep
//! - [`RankEntry`] - One player's standing inside a partition
//! - [`LeaderboardSnapshot`] - The last broadcast top-N of a partition
//! - [`LeaderboardDiff`] - The wire payload pushed to clients
//!
//! Wire-facing types serialize in camelCase so the payload shape matches what
//! clients already consume (`playerId`, `topN`, `previousRank`, ...).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a player.
///
/// Wrapper around UUID so player ids cannot be confused with match or
/// connection ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    /// Creates a new random player ID using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for PlayerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Scopes and partitions
// ============================================================================

/// Volatility class of a scope, used to pick cache TTLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    /// Short-lived session ladders; every match reshuffles them.
    Session,
    /// The fleet-wide ladder.
    Global,
    /// Regional ladders; fewer matches per second than global.
    Regional,
}

/// A ranking partition.
///
/// Scopes render to and parse from stable string keys:
/// `global`, `regional:<region>` and `session:<session>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Scope {
    Global,
    Regional(String),
    Session(String),
}

impl Scope {
    pub fn regional(region: impl Into<String>) -> Self {
        Self::Regional(region.into())
    }

    pub fn session(session: impl Into<String>) -> Self {
        Self::Session(session.into())
    }

    pub fn kind(&self) -> ScopeKind {
        match self {
            Scope::Global => ScopeKind::Global,
            Scope::Regional(_) => ScopeKind::Regional,
            Scope::Session(_) => ScopeKind::Session,
        }
    }

    /// Stable string key for this scope.
    pub fn as_key(&self) -> String {
        match self {
            Scope::Global => "global".to_string(),
            Scope::Regional(region) => format!("regional:{region}"),
            Scope::Session(session) => format!("session:{session}"),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_key())
    }
}

/// Error returned when a scope key cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid scope '{0}'")]
pub struct InvalidScope(pub String);

impl FromStr for Scope {
    type Err = InvalidScope;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Scope names end up inside cache keys, which use '/' as separator.
        let valid_name = |name: &str| !name.is_empty() && !name.contains('/');

        match s.split_once(':') {
            None if s == "global" => Ok(Scope::Global),
            Some(("regional", region)) if valid_name(region) => Ok(Scope::Regional(region.to_string())),
            Some(("session", session)) if valid_name(session) => Ok(Scope::Session(session.to_string())),
            _ => Err(InvalidScope(s.to_string())),
        }
    }
}

impl TryFrom<String> for Scope {
    type Error = InvalidScope;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.as_key()
    }
}

/// A `(scope, season)` pair. Ranks are contiguous within one partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionKey {
    pub scope: Scope,
    pub season_id: Option<String>,
}

impl PartitionKey {
    pub fn new(scope: Scope, season_id: Option<String>) -> Self {
        Self { scope, season_id }
    }

    pub fn global() -> Self {
        Self::new(Scope::Global, None)
    }

    /// Season segment used in keys; empty for "no season".
    ///
    /// Only injective for partitions that pass [`PartitionKey::validate`].
    pub fn season_segment(&self) -> &str {
        self.season_id.as_deref().unwrap_or("")
    }

    /// Season ids end up inside cache keys and room names, so they must be
    /// non-empty and free of `/`.
    pub fn validate(&self) -> Result<(), InvalidPartition> {
        match self.season_id.as_deref() {
            Some(season) if season.is_empty() || season.contains('/') => {
                Err(InvalidPartition(format!("{}/{}", self.scope, season)))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.season_id {
            Some(season) => write!(f, "{}/{}", self.scope, season),
            None => write!(f, "{}", self.scope),
        }
    }
}

/// Error returned for a partition whose season id cannot be keyed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid season in partition '{0}'")]
pub struct InvalidPartition(pub String);

// ============================================================================
// Rank entries
// ============================================================================

/// One player's standing inside a partition.
///
/// A rank of `0` means "unranked, pending the first sweep". Entries are never
/// deleted; `active = false` removes them from sweeps and lookups while the
/// row stays readable for history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankEntry {
    pub player_id: PlayerId,
    pub scope: Scope,
    pub season_id: Option<String>,
    pub rating: i32,
    pub rank: u32,
    pub previous_rank: u32,
    pub rank_change: i32,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
    pub matches_played: u32,
    pub win_rate: f64,
    pub current_streak: i32,
    pub peak_rating: i32,
    pub lowest_rating: i32,
    pub last_match_at: Option<DateTime<Utc>>,
    /// Account creation time of the player; the last tie-break key.
    pub account_created_at: DateTime<Utc>,
    pub active: bool,
}

impl RankEntry {
    /// Creates a fresh, unranked entry at `rating`.
    pub fn new(
        player_id: PlayerId,
        partition: &PartitionKey,
        rating: i32,
        account_created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            player_id,
            scope: partition.scope.clone(),
            season_id: partition.season_id.clone(),
            rating,
            rank: 0,
            previous_rank: 0,
            rank_change: 0,
            wins: 0,
            losses: 0,
            draws: 0,
            matches_played: 0,
            win_rate: 0.0,
            current_streak: 0,
            peak_rating: rating,
            lowest_rating: rating,
            last_match_at: None,
            account_created_at,
            active: true,
        }
    }

    pub fn partition(&self) -> PartitionKey {
        PartitionKey::new(self.scope.clone(), self.season_id.clone())
    }

    /// Folds a finished match into the match-derived fields.
    ///
    /// Rank fields are left for the next sweep.
    pub fn apply_match(&mut self, outcome: MatchOutcome, rating_delta: i32, played_at: DateTime<Utc>) {
        self.rating = self.rating.saturating_add(rating_delta);
        self.peak_rating = self.peak_rating.max(self.rating);
        self.lowest_rating = self.lowest_rating.min(self.rating);
        self.matches_played += 1;

        match outcome {
            MatchOutcome::Win => {
                self.wins += 1;
                self.current_streak = if self.current_streak > 0 { self.current_streak + 1 } else { 1 };
            }
            MatchOutcome::Loss => {
                self.losses += 1;
                self.current_streak = if self.current_streak < 0 { self.current_streak - 1 } else { -1 };
            }
            MatchOutcome::Draw => {
                self.draws += 1;
                self.current_streak = 0;
            }
        }

        self.win_rate = round2(self.wins as f64 / self.matches_played as f64 * 100.0);
        self.last_match_at = Some(played_at);
    }
}

/// Total standing order: rating desc, wins desc, account age asc.
///
/// Player id is the final key so two distinct entries never compare equal.
pub fn standing_order(a: &RankEntry, b: &RankEntry) -> Ordering {
    b.rating
        .cmp(&a.rating)
        .then_with(|| b.wins.cmp(&a.wins))
        .then_with(|| a.account_created_at.cmp(&b.account_created_at))
        .then_with(|| a.player_id.cmp(&b.player_id))
}

/// New rank assignment for one entry, written by a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankUpdate {
    pub player_id: PlayerId,
    pub rank: u32,
    pub previous_rank: u32,
    pub rank_change: i32,
}

/// Result of a rank lookup for a single player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRank {
    pub rank: u32,
    pub total: u64,
    pub percentile: f64,
    pub rating: i32,
}

/// One page of a partition's standings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankPage {
    pub entries: Vec<RankEntry>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

// ============================================================================
// Matches
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOutcome {
    Win,
    Loss,
    Draw,
}

/// A finished match from one participant's point of view.
///
/// `rating_delta` is computed upstream by the rating formula; this subsystem
/// only applies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub match_id: String,
    pub player_id: PlayerId,
    pub scope: Scope,
    pub season_id: Option<String>,
    pub outcome: MatchOutcome,
    pub rating_delta: i32,
    pub played_at: DateTime<Utc>,
}

impl MatchResult {
    pub fn partition(&self) -> PartitionKey {
        PartitionKey::new(self.scope.clone(), self.season_id.clone())
    }
}

// ============================================================================
// Snapshots and diffs
// ============================================================================

/// One row of a broadcast snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEntry {
    pub player_id: PlayerId,
    pub rank: u32,
    pub rating: i32,
}

impl From<&RankEntry> for SnapshotEntry {
    fn from(entry: &RankEntry) -> Self {
        Self {
            player_id: entry.player_id,
            rank: entry.rank,
            rating: entry.rating,
        }
    }
}

impl From<&TopEntry> for SnapshotEntry {
    fn from(entry: &TopEntry) -> Self {
        Self {
            player_id: entry.player_id,
            rank: entry.rank,
            rating: entry.rating,
        }
    }
}

/// The last top-N a partition broadcast, replaced wholesale each cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardSnapshot {
    pub scope: Scope,
    pub season_id: Option<String>,
    pub entries: Vec<SnapshotEntry>,
    /// Epoch milliseconds.
    pub captured_at: i64,
}

impl LeaderboardSnapshot {
    pub fn partition(&self) -> PartitionKey {
        PartitionKey::new(self.scope.clone(), self.season_id.clone())
    }
}

/// Direction of a rank change between two broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Movement {
    New,
    Up,
    Down,
    Unchanged,
}

/// A single changed row inside a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankChange {
    pub player_id: PlayerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_rank: Option<u32>,
    pub current_rank: u32,
    pub movement: Movement,
}

/// Top-N row carried in a diff payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopEntry {
    pub player_id: PlayerId,
    pub rank: u32,
    pub rating: i32,
    pub wins: u32,
    pub losses: u32,
    pub win_rate: f64,
}

impl From<&RankEntry> for TopEntry {
    fn from(entry: &RankEntry) -> Self {
        Self {
            player_id: entry.player_id,
            rank: entry.rank,
            rating: entry.rating,
            wins: entry.wins,
            losses: entry.losses,
            win_rate: entry.win_rate,
        }
    }
}

/// Leaderboard update pushed to clients and relayed across processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardDiff {
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season_id: Option<String>,
    #[serde(rename = "topN")]
    pub top_n: Vec<TopEntry>,
    pub changes: Vec<RankChange>,
    /// Epoch milliseconds; clients use it to discard late, stale diffs.
    pub timestamp: i64,
}

impl LeaderboardDiff {
    pub fn partition(&self) -> PartitionKey {
        PartitionKey::new(self.scope.clone(), self.season_id.clone())
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Rounds to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Share of the partition ranked below `rank`, as a percentage.
///
/// Unranked entries (`rank == 0`) and empty partitions report `0.0`.
pub fn percentile(rank: u32, total: u64) -> f64 {
    if rank == 0 || total == 0 {
        return 0.0;
    }
    let below = total.saturating_sub(rank as u64) as f64;
    round2(below / total as f64 * 100.0)
}

/// Returns the current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(rating: i32, wins: u32, created_year: i32) -> RankEntry {
        let created = Utc.with_ymd_and_hms(created_year, 1, 1, 0, 0, 0).unwrap();
        let mut e = RankEntry::new(PlayerId::new(), &PartitionKey::global(), rating, created);
        e.wins = wins;
        e
    }

    #[test]
    fn test_scope_keys_roundtrip() {
        for key in ["global", "regional:eu-west", "session:abc123"] {
            let scope: Scope = key.parse().unwrap();
            assert_eq!(scope.as_key(), key);
        }
        assert_eq!(Scope::regional("na"), "regional:na".parse().unwrap());
    }

    #[test]
    fn test_scope_rejects_garbage() {
        for key in ["", "globe", "regional:", "session:a/b", "season:1"] {
            assert!(key.parse::<Scope>().is_err(), "{key} should not parse");
        }
    }

    #[test]
    fn test_scope_serializes_as_string() {
        let json = serde_json::to_string(&Scope::session("s1")).unwrap();
        assert_eq!(json, "\"session:s1\"");
        let back: Scope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Scope::session("s1"));
        assert!(serde_json::from_str::<Scope>("\"nope\"").is_err());
    }

    #[test]
    fn test_partition_display() {
        assert_eq!(PartitionKey::global().to_string(), "global");
        let p = PartitionKey::new(Scope::regional("eu"), Some("s7".into()));
        assert_eq!(p.to_string(), "regional:eu/s7");
    }

    #[test]
    fn test_partition_season_validation() {
        assert!(PartitionKey::global().validate().is_ok());
        assert!(PartitionKey::new(Scope::Global, Some("_".into())).validate().is_ok());
        for season in ["", "s1/extra", "/"] {
            let p = PartitionKey::new(Scope::Global, Some(season.into()));
            assert!(p.validate().is_err(), "{season:?} should be rejected");
        }
    }

    #[test]
    fn test_season_segment_distinguishes_missing_season() {
        let none = PartitionKey::global();
        let underscore = PartitionKey::new(Scope::Global, Some("_".into()));
        assert_ne!(none.season_segment(), underscore.season_segment());
    }

    #[test]
    fn test_standing_order_rating_first() {
        let high = entry(2000, 0, 2023);
        let low = entry(1900, 50, 2020);
        assert_eq!(standing_order(&high, &low), Ordering::Less);
    }

    #[test]
    fn test_standing_order_wins_then_account_age() {
        let more_wins = entry(1900, 10, 2023);
        let fewer_wins = entry(1900, 5, 2020);
        assert_eq!(standing_order(&more_wins, &fewer_wins), Ordering::Less);

        let older = entry(1900, 5, 2022);
        let newer = entry(1900, 5, 2023);
        assert_eq!(standing_order(&older, &newer), Ordering::Less);
    }

    #[test]
    fn test_apply_match_tracks_streaks_and_extremes() {
        let mut e = entry(1500, 0, 2023);
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        e.apply_match(MatchOutcome::Win, 20, at);
        e.apply_match(MatchOutcome::Win, 18, at);
        assert_eq!(e.current_streak, 2);
        assert_eq!(e.peak_rating, 1538);

        e.apply_match(MatchOutcome::Loss, -60, at);
        assert_eq!(e.current_streak, -1);
        assert_eq!(e.rating, 1478);
        assert_eq!(e.lowest_rating, 1478);
        assert_eq!(e.peak_rating, 1538);

        e.apply_match(MatchOutcome::Draw, 0, at);
        assert_eq!(e.current_streak, 0);
        assert_eq!((e.wins, e.losses, e.draws, e.matches_played), (2, 1, 1, 4));
        assert_eq!(e.win_rate, 50.0);
        assert_eq!(e.last_match_at, Some(at));
        assert_eq!(e.rank, 0);
    }

    #[test]
    fn test_percentile_examples() {
        assert_eq!(percentile(5, 100), 95.0);
        assert_eq!(percentile(1, 50), 98.0);
        assert_eq!(percentile(100, 100), 0.0);
        assert_eq!(percentile(0, 100), 0.0);
        assert_eq!(percentile(1, 0), 0.0);
        assert_eq!(percentile(1, 3), 66.67);
    }

    #[test]
    fn test_diff_wire_shape() {
        let player_id = PlayerId::new();
        let diff = LeaderboardDiff {
            scope: Scope::Global,
            season_id: None,
            top_n: vec![TopEntry {
                player_id,
                rank: 1,
                rating: 2000,
                wins: 3,
                losses: 1,
                win_rate: 75.0,
            }],
            changes: vec![RankChange {
                player_id,
                previous_rank: None,
                current_rank: 1,
                movement: Movement::New,
            }],
            timestamp: 1_700_000_000_000,
        };

        let value = serde_json::to_value(&diff).unwrap();
        assert_eq!(value["scope"], "global");
        assert!(value.get("seasonId").is_none());
        assert_eq!(value["topN"][0]["winRate"], 75.0);
        assert_eq!(value["changes"][0]["movement"], "new");
        assert!(value["changes"][0].get("previousRank").is_none());
        assert_eq!(value["changes"][0]["currentRank"], 1);
    }
}
