//! End-to-end tests for a fleet of standings servers
//!
//! Each test runs two servers against one shared store, cache and bus hub,
//! with clients attached through the connection registry.

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use standings_core::*;
use standings_server::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

struct Fleet {
    a: Arc<StandingsServer>,
    b: Arc<StandingsServer>,
    hub: Arc<InMemoryBusHub>,
}

fn config(id: &str) -> ServerConfig {
    ServerConfig {
        instance_id: id.to_string(),
        sweep_interval: Duration::ZERO,
        ..ServerConfig::default()
    }
}

async fn fleet() -> Fleet {
    let store = Arc::new(InMemoryRankStore::new());
    let cache = Arc::new(InMemoryCacheTransport::new());
    let hub = InMemoryBusHub::new();

    let transports = |hub: &Arc<InMemoryBusHub>| Transports {
        store: store.clone(),
        cache: cache.clone(),
        bus: Arc::new(hub.connect()),
    };
    let a = StandingsServer::new(config("node-a"), transports(&hub));
    let b = StandingsServer::new(config("node-b"), transports(&hub));
    a.start().await.unwrap();
    b.start().await.unwrap();
    settle().await;

    Fleet { a, b, hub }
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<ServerMessage> {
    let mut messages = Vec::new();
    while let Ok(text) = rx.try_recv() {
        messages.push(serde_json::from_str(&text).unwrap());
    }
    messages
}

fn client_message(event: &str, data: Value) -> String {
    json!({ "namespace": "leaderboard", "event": event, "data": data }).to_string()
}

fn outcome(match_id: &str, player_id: PlayerId, outcome: MatchOutcome, delta: i32) -> MatchResult {
    MatchResult {
        match_id: match_id.to_string(),
        player_id,
        scope: Scope::Global,
        season_id: None,
        outcome,
        rating_delta: delta,
        played_at: Utc::now(),
    }
}

async fn two_players(server: &StandingsServer) -> (PlayerId, PlayerId) {
    let partition = PartitionKey::global();
    let first = PlayerId::new();
    let second = PlayerId::new();
    let created = Utc.with_ymd_and_hms(2022, 6, 1, 0, 0, 0).unwrap();
    server.register_player(first, &partition, created).await.unwrap();
    server.register_player(second, &partition, created).await.unwrap();
    (first, second)
}

#[tokio::test]
async fn test_join_replies_with_snapshot() {
    let fleet = fleet().await;
    let (client, mut rx) = fleet.b.connect();

    fleet
        .b
        .handle_client_message(client, &client_message("join", json!({ "scope": "global" })))
        .await
        .unwrap();

    let replies = drain(&mut rx);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].event, client_events::LEADERBOARD_SNAPSHOT);
    assert_eq!(replies[0].data, Value::Null);
    assert_eq!(fleet.b.registry().room_size("leaderboard:global"), 1);

    // After a broadcast anywhere in the fleet, a fresh join sees the snapshot.
    let (winner, loser) = two_players(&fleet.a).await;
    fleet
        .a
        .complete_match(&[
            outcome("m-1", winner, MatchOutcome::Win, 20),
            outcome("m-1", loser, MatchOutcome::Loss, -20),
        ])
        .await
        .unwrap();
    settle().await;

    let (late, mut late_rx) = fleet.b.connect();
    fleet
        .b
        .handle_client_message(late, &client_message("join", json!({ "scope": "global" })))
        .await
        .unwrap();
    let snapshot = &drain(&mut late_rx)[0].data;
    assert_eq!(snapshot["entries"][0]["playerId"], winner.to_string());
    assert_eq!(snapshot["entries"][0]["rank"], 1);
}

#[tokio::test]
async fn test_match_on_one_server_reaches_clients_of_another() {
    let fleet = fleet().await;
    let (client, mut rx) = fleet.b.connect();
    fleet
        .b
        .handle_client_message(client, &client_message("join", json!({ "scope": "global" })))
        .await
        .unwrap();
    drain(&mut rx);

    let (winner, loser) = two_players(&fleet.a).await;
    let completion = fleet
        .a
        .complete_match(&[
            outcome("m-7", winner, MatchOutcome::Win, 16),
            outcome("m-7", loser, MatchOutcome::Loss, -16),
        ])
        .await
        .unwrap();
    assert!(matches!(
        completion.refreshes[0].broadcast,
        BroadcastOutcome::Published { changes: 2, relayed: true, .. }
    ));
    settle().await;

    let pushes = drain(&mut rx);
    let feed: Vec<&ServerMessage> = pushes
        .iter()
        .filter(|m| m.event == client_events::MATCH_COMPLETED)
        .collect();
    assert_eq!(feed.len(), 2);
    assert_eq!(feed[0].data["matchId"], "m-7");

    let updates: Vec<&ServerMessage> = pushes
        .iter()
        .filter(|m| m.event == client_events::LEADERBOARD_UPDATE)
        .collect();
    assert_eq!(updates.len(), 1);
    let diff = &updates[0].data;
    assert_eq!(diff["scope"], "global");
    assert_eq!(diff["topN"][0]["playerId"], winner.to_string());
    assert_eq!(diff["changes"][0]["movement"], "new");
    assert_eq!(fleet.b.broadcaster().stats().remote_deliveries, 1);
}

#[tokio::test]
async fn test_rank_notice_reaches_tracked_player_room() {
    let fleet = fleet().await;
    let (first, second) = two_players(&fleet.a).await;

    fleet
        .a
        .complete_match(&[
            outcome("m-1", first, MatchOutcome::Win, 10),
            outcome("m-1", second, MatchOutcome::Loss, -10),
        ])
        .await
        .unwrap();
    settle().await;

    let (client, mut rx) = fleet.b.connect();
    fleet
        .b
        .handle_client_message(
            client,
            &client_message("track_player", json!({ "playerId": second.to_string() })),
        )
        .await
        .unwrap();

    // The rematch swaps the top two.
    let completion = fleet
        .a
        .complete_match(&[
            outcome("m-2", first, MatchOutcome::Loss, -30),
            outcome("m-2", second, MatchOutcome::Win, 30),
        ])
        .await
        .unwrap();
    assert_eq!(completion.refreshes[0].sweep.moved.len(), 2);
    settle().await;

    let notices: Vec<ServerMessage> = drain(&mut rx)
        .into_iter()
        .filter(|m| m.event == client_events::RANK_CHANGED)
        .collect();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].data["playerId"], second.to_string());
    assert_eq!(notices[0].data["rank"], 1);
    assert_eq!(notices[0].data["previousRank"], 2);
    assert_eq!(notices[0].data["rankChange"], 1);

    fleet
        .b
        .handle_client_message(
            client,
            &client_message("untrack_player", json!({ "playerId": second.to_string() })),
        )
        .await
        .unwrap();
    assert!(fleet.b.registry().rooms_of(client).is_empty());
}

#[tokio::test]
async fn test_disconnect_drops_room_membership() {
    let fleet = fleet().await;
    let (client, _rx) = fleet.a.connect();
    fleet
        .a
        .handle_client_message(
            client,
            &client_message("join", json!({ "scope": "regional:eu", "seasonId": "s2" })),
        )
        .await
        .unwrap();
    assert_eq!(fleet.a.registry().room_size("leaderboard:regional:eu/s2"), 1);

    fleet.a.disconnect(client);
    assert_eq!(fleet.a.registry().room_size("leaderboard:regional:eu/s2"), 0);
    assert_eq!(fleet.a.stats().await.connections, 0);
}

#[tokio::test]
async fn test_bad_client_messages_are_rejected() {
    let fleet = fleet().await;
    let (client, _rx) = fleet.a.connect();

    let not_json = fleet.a.handle_client_message(client, "{oops").await;
    assert!(matches!(not_json, Err(ServerError::Protocol(_))));

    let wrong_namespace = json!({ "namespace": "chat", "event": "join", "data": {} }).to_string();
    assert!(matches!(
        fleet.a.handle_client_message(client, &wrong_namespace).await,
        Err(ServerError::Protocol(_))
    ));

    let bad_scope = client_message("join", json!({ "scope": "galactic" }));
    assert!(matches!(
        fleet.a.handle_client_message(client, &bad_scope).await,
        Err(ServerError::Protocol(_))
    ));

    let bad_season = client_message("join", json!({ "scope": "global", "seasonId": "s1/page/1" }));
    assert!(matches!(
        fleet.a.handle_client_message(client, &bad_season).await,
        Err(ServerError::Protocol(_))
    ));
    assert!(fleet.a.registry().rooms_of(client).is_empty());

    let unknown_event = client_message("subscribe_all", json!({}));
    assert!(matches!(
        fleet.a.handle_client_message(client, &unknown_event).await,
        Err(ServerError::Protocol(_))
    ));

    fleet.a.disconnect(client);
    let gone = client_message("join", json!({ "scope": "global" }));
    assert!(matches!(
        fleet.a.handle_client_message(client, &gone).await,
        Err(ServerError::Internal(_))
    ));
}

#[tokio::test]
async fn test_shutdown_announces_departure() {
    let fleet = fleet().await;
    let departures = Arc::new(Mutex::new(Vec::new()));
    let seen = departures.clone();
    fleet
        .a
        .bus()
        .subscribe(
            channels::SYSTEM_EVENTS,
            FnSubscriber::new(move |inbound: &InboundEvent| {
                if let BusEvent::InstanceStopping(notice) = &inbound.event {
                    seen.lock().unwrap().push(notice.instance_id.clone());
                }
                Ok(())
            }),
        )
        .await
        .unwrap();

    fleet.b.shutdown().await.unwrap();
    settle().await;

    assert_eq!(*departures.lock().unwrap(), vec!["node-b".to_string()]);
    assert!(!fleet.b.is_running());
    assert_eq!(fleet.hub.subscriber_count(channels::LEADERBOARD_UPDATES), 1);

    fleet.a.shutdown().await.unwrap();
    assert_eq!(fleet.hub.subscriber_count(channels::LEADERBOARD_UPDATES), 0);
}

#[tokio::test]
async fn test_stats_reflect_activity() {
    let fleet = fleet().await;
    let (winner, loser) = two_players(&fleet.a).await;
    fleet
        .a
        .complete_match(&[
            outcome("m-3", winner, MatchOutcome::Draw, 0),
            outcome("m-3", loser, MatchOutcome::Draw, 0),
        ])
        .await
        .unwrap();
    settle().await;

    let stats = fleet.a.stats().await;
    assert_eq!(stats.instance_id, "node-a");
    assert_eq!(stats.broadcast.published, 1);
    assert!(stats.bus.channels.contains_key(channels::LEADERBOARD_UPDATES));
    assert!(stats.bus_health.connected);
    assert_eq!(stats.bus_health.subscribed_channels.len(), 4);

    let remote = fleet.b.stats().await;
    assert_eq!(remote.broadcast.remote_deliveries, 1);
    assert_eq!(remote.broadcast.published, 0);
}

#[tokio::test(start_paused = true)]
async fn test_join_after_remote_update_sees_latest_standings() {
    let fleet = fleet().await;
    let (winner, loser) = two_players(&fleet.a).await;

    // B has broadcast once, so it holds a snapshot of its own.
    fleet.b.track(PartitionKey::global());
    fleet.b.refresh(&PartitionKey::global()).await.unwrap();

    fleet
        .a
        .complete_match(&[
            outcome("m-9", winner, MatchOutcome::Win, 50),
            outcome("m-9", loser, MatchOutcome::Loss, -50),
        ])
        .await
        .unwrap();
    settle().await;

    let (client, mut rx) = fleet.b.connect();
    fleet
        .b
        .handle_client_message(client, &client_message("join", json!({ "scope": "global" })))
        .await
        .unwrap();
    let snapshot = &drain(&mut rx)[0].data;
    assert_eq!(snapshot["entries"][0]["playerId"], winner.to_string());
    assert_eq!(snapshot["entries"][0]["rating"], 1250);

    // B already knows this state, so its next cycle pushes nothing.
    tokio::time::advance(Duration::from_secs(2)).await;
    let refresh = fleet.b.refresh(&PartitionKey::global()).await.unwrap();
    assert_eq!(refresh.broadcast, BroadcastOutcome::Unchanged);
    assert!(drain(&mut rx).is_empty());
}
