//! # Standings Core
//!
//! Ranking engine for a fleet of stateless leaderboard servers.
//!
//! Every server process shares one authoritative store, one cache and one
//! message bus, and holds no authoritative state of its own. This crate keeps
//! per-scope rankings correct and current, serves them cheaply under heavy
//! read load, and fans out only what changed to every connected client on
//! every process.
//!
//! ## Components
//!
//! * [`RankCache`] - Cache-aside wrapper that absorbs every cache fault
//! * [`EventBus`] - Pub/sub with origin stamping, publish retry, echo
//!   suppression and per-channel multiplexing
//! * [`RankService`] - Paged queries, player lookups and the recalculation
//!   sweep, the sole writer of rank values
//! * [`compute_diff`] - Minimal change set between two leaderboards
//! * [`Broadcaster`] - Throttled recompute-diff-publish cycle per partition
//! * [`FleetRelay`] - Delivers events from other processes to local rooms
//!
//! ## Ports
//!
//! Transports sit behind traits so tests and single-node deployments run on
//! the in-memory adapters shipped here:
//!
//! * [`RankStore`] / [`InMemoryRankStore`]
//! * [`CacheTransport`] / [`InMemoryCacheTransport`]
//! * [`MessageBus`] / [`InMemoryBus`] (via [`InMemoryBusHub`])
//! * [`RoomBroadcaster`] / [`RecordingRooms`]
//!
//! ## Control Flow
//!
//! 1. A match completes or the sweep timer fires
//! 2. [`RankService::recalculate`] re-ranks the partition and invalidates its
//!    cache keys
//! 3. [`Broadcaster::trigger`] fetches the fresh top-N and diffs it against the
//!    last snapshot
//! 4. The diff goes to local connections and out on the bus
//! 5. Every other process's [`FleetRelay`] receives it and emits it locally,
//!    without re-publishing
//!
//! ## Example
//!
//! ```rust,no_run
//! use standings_core::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), RankingError> {
//! let cache = Arc::new(RankCache::new(
//!     Arc::new(InMemoryCacheTransport::new()),
//!     CacheConfig::default(),
//! ));
//! let ranks = RankService::new(Arc::new(InMemoryRankStore::new()), cache, RankServiceConfig::default());
//!
//! let partition = PartitionKey::global();
//! ranks.recalculate(&partition).await?;
//! let page = ranks.get_page(&partition, 1, 25).await?;
//! println!("{} players ranked", page.total);
//! # Ok(())
//! # }
//! ```

pub mod broadcaster;
pub mod bus;
pub mod cache;
pub mod diff;
pub mod error;
pub mod events;
pub mod rank_service;
pub mod relay;
pub mod rooms;
pub mod store;
pub mod throttle;
pub mod types;

pub use broadcaster::{BroadcastOutcome, BroadcastPhase, BroadcastStats, Broadcaster, BroadcasterConfig};
pub use bus::{
    BusHealth, BusStats, BusSubscriber, ChannelStats, EventBus, FnSubscriber, InMemoryBus, InMemoryBusHub,
    InboundEvent, MessageBus, RetryPolicy, SubscriptionId,
};
pub use cache::{
    keys, CacheConfig, CacheEntry, CacheLookup, CacheStats, CacheTransport, InMemoryCacheTransport, RankCache,
    TtlTable,
};
pub use diff::compute_diff;
pub use error::{BusError, CacheError, EventError, RankingError, StoreError};
pub use events::{channels, BusEvent, EventEnvelope, EventType, InstanceNotice, RankNotifications};
pub use rank_service::{RankService, RankServiceConfig, SweepReport};
pub use relay::FleetRelay;
pub use rooms::{
    client_events, leaderboard_room, player_room, ConnectionId, RecordingRooms, RoomBroadcaster, RoomEmit,
};
pub use store::{InMemoryRankStore, RankStore};
pub use throttle::Throttle;
pub use types::*;
