//! Integration tests for cross-process leaderboard fan-out
//!
//! Two "processes" share one store, one cache and one bus hub, the way real
//! server instances share the relational store, the cache server and the
//! pub/sub broker.

use chrono::{TimeZone, Utc};
use standings_core::*;
use std::sync::Arc;
use std::time::Duration;

struct Node {
    ranks: Arc<RankService>,
    bus: Arc<EventBus>,
    transport: Arc<InMemoryBus>,
    rooms: Arc<RecordingRooms>,
    broadcaster: Arc<Broadcaster>,
}

async fn node(
    id: &str,
    store: Arc<InMemoryRankStore>,
    cache: Arc<InMemoryCacheTransport>,
    hub: &Arc<InMemoryBusHub>,
) -> Node {
    let cache = Arc::new(RankCache::new(cache, CacheConfig::default()));
    let ranks = Arc::new(RankService::new(store, cache, RankServiceConfig::default()));
    let transport = Arc::new(hub.connect());
    let bus = EventBus::new(id, transport.clone(), RetryPolicy::default());
    let rooms = Arc::new(RecordingRooms::new());
    let broadcaster = Arc::new(Broadcaster::new(
        ranks.clone(),
        bus.clone(),
        rooms.clone(),
        BroadcasterConfig::default(),
    ));
    FleetRelay::new(broadcaster.clone(), rooms.clone())
        .attach(&bus)
        .await
        .expect("relay attaches");

    Node {
        ranks,
        bus,
        transport,
        rooms,
        broadcaster,
    }
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

async fn seed(store: &InMemoryRankStore, partition: &PartitionKey, ratings: &[i32]) -> Vec<PlayerId> {
    let mut ids = Vec::new();
    for (i, &rating) in ratings.iter().enumerate() {
        let created = Utc.with_ymd_and_hms(2020 + i as i32, 1, 1, 0, 0, 0).unwrap();
        let entry = RankEntry::new(PlayerId::new(), partition, rating, created);
        ids.push(entry.player_id);
        store.insert_entry(entry).await.unwrap();
    }
    ids
}

#[tokio::test]
async fn test_update_reaches_other_process_once() {
    let store = Arc::new(InMemoryRankStore::new());
    let cache = Arc::new(InMemoryCacheTransport::new());
    let hub = InMemoryBusHub::new();
    let a = node("node-a", store.clone(), cache.clone(), &hub).await;
    let b = node("node-b", store.clone(), cache.clone(), &hub).await;

    let partition = PartitionKey::global();
    let room = leaderboard_room(&partition);
    seed(&store, &partition, &[2000, 1900, 1800]).await;
    a.rooms.join(ConnectionId(1), &room).await;
    b.rooms.join(ConnectionId(2), &room).await;

    a.ranks.recalculate(&partition).await.unwrap();
    let outcome = a.broadcaster.trigger(&partition).await;
    assert!(matches!(outcome, BroadcastOutcome::Published { changes: 3, relayed: true, .. }));
    settle().await;

    // Origin emitted locally exactly once; its own echo was suppressed.
    assert_eq!(a.rooms.emitted_to(&room).len(), 1);
    assert_eq!(a.bus.stats().self_echoes, 1);

    // The other process delivered it locally and did not re-publish.
    let delivered = b.rooms.emitted_to(&room);
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].event, client_events::LEADERBOARD_UPDATE);
    assert_eq!(delivered[0].payload, a.rooms.emitted_to(&room)[0].payload);
    assert_eq!(b.transport.publish_calls(), 0);
    assert_eq!(b.broadcaster.stats().remote_deliveries, 1);
}

#[tokio::test]
async fn test_diff_payload_shape_on_the_wire() {
    let store = Arc::new(InMemoryRankStore::new());
    let cache = Arc::new(InMemoryCacheTransport::new());
    let hub = InMemoryBusHub::new();
    let a = node("node-a", store.clone(), cache.clone(), &hub).await;
    let b = node("node-b", store.clone(), cache, &hub).await;

    let partition = PartitionKey::new(Scope::regional("eu"), Some("s1".into()));
    let room = leaderboard_room(&partition);
    seed(&store, &partition, &[1500, 1600]).await;
    b.rooms.join(ConnectionId(9), &room).await;

    a.ranks.recalculate(&partition).await.unwrap();
    a.broadcaster.trigger(&partition).await;
    settle().await;

    let payload = &b.rooms.emitted_to(&room)[0].payload;
    assert_eq!(payload["scope"], "regional:eu");
    assert_eq!(payload["seasonId"], "s1");
    assert!(payload["timestamp"].as_i64().unwrap() > 0);
    let top = payload["topN"].as_array().unwrap();
    assert_eq!(top.len(), 2);
    assert_eq!(top[0]["rating"], 1600);
    for field in ["playerId", "rank", "rating", "wins", "losses", "winRate"] {
        assert!(top[0].get(field).is_some(), "missing {field}");
    }
    let changes = payload["changes"].as_array().unwrap();
    assert!(changes.iter().all(|c| c["movement"] == "new"));
}

#[tokio::test]
async fn test_cache_outage_keeps_fleet_correct() {
    let store = Arc::new(InMemoryRankStore::new());
    let cache = Arc::new(InMemoryCacheTransport::new());
    let hub = InMemoryBusHub::new();
    let a = node("node-a", store.clone(), cache.clone(), &hub).await;

    let partition = PartitionKey::global();
    let ids = seed(&store, &partition, &[2000, 1900, 1900]).await;
    cache.set_available(false);

    a.ranks.recalculate(&partition).await.unwrap();
    let page = a.ranks.get_page(&partition, 1, 10).await.unwrap();

    // 1900 (2021) is older than 1900 (2022).
    assert_eq!(page.entries.iter().map(|e| e.player_id).collect::<Vec<_>>(), ids);
    assert_eq!(page.entries.iter().map(|e| e.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(matches!(
        a.broadcaster.trigger(&partition).await,
        BroadcastOutcome::Published { .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_relay_failure_still_serves_local_clients() {
    let store = Arc::new(InMemoryRankStore::new());
    let cache = Arc::new(InMemoryCacheTransport::new());
    let hub = InMemoryBusHub::new();
    let a = node("node-a", store.clone(), cache.clone(), &hub).await;
    let b = node("node-b", store.clone(), cache, &hub).await;

    let partition = PartitionKey::global();
    let room = leaderboard_room(&partition);
    seed(&store, &partition, &[2000]).await;
    a.rooms.join(ConnectionId(1), &room).await;
    b.rooms.join(ConnectionId(2), &room).await;

    a.transport.fail_next_publishes(3);
    a.ranks.recalculate(&partition).await.unwrap();
    let outcome = a.broadcaster.trigger(&partition).await;
    assert!(matches!(outcome, BroadcastOutcome::Published { delivered: 1, relayed: false, .. }));
    settle().await;
    assert!(b.rooms.emitted_to(&room).is_empty());

    // The next cycle after the window heals the other process.
    let mut entry = store.find_entry(a.ranks.top(&partition).await.unwrap()[0].player_id, &partition)
        .await
        .unwrap()
        .unwrap();
    entry.rating += 10;
    store.save_match_stats(&entry).await.unwrap();
    a.ranks.recalculate(&partition).await.unwrap();
    tokio::time::advance(Duration::from_secs(1)).await;

    assert!(matches!(
        a.broadcaster.trigger(&partition).await,
        BroadcastOutcome::Published { relayed: true, .. }
    ));
    settle().await;
    assert_eq!(b.rooms.emitted_to(&room).len(), 1);
}
