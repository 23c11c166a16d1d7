//! Routing of client messages.
//!
//! Clients only manage subscriptions here: which leaderboards they watch and
//! which players' personal notices they receive. Everything else flows from
//! the server to the client.

use crate::connection::ConnectionRegistry;
use crate::error::ServerError;
use crate::messaging::{ClientMessage, PlayerRequest, RoomRequest, ServerMessage, LEADERBOARD_NAMESPACE};
use serde::de::DeserializeOwned;
use standings_core::{
    client_events, leaderboard_room, player_room, Broadcaster, ConnectionId, PartitionKey, RoomBroadcaster,
};
use tracing::debug;

/// Parses and applies one raw client message.
///
/// # Supported events (namespace `leaderboard`)
///
/// * `join` / `leave` - `{scope, seasonId?}`; `join` replies with the last
///   broadcast snapshot of that leaderboard (or `null` if none yet)
/// * `track_player` / `untrack_player` - `{playerId}`; personal rank notices
pub async fn route_client_message(
    text: &str,
    connection_id: ConnectionId,
    registry: &ConnectionRegistry,
    broadcaster: &Broadcaster,
) -> Result<(), ServerError> {
    let message: ClientMessage =
        serde_json::from_str(text).map_err(|e| ServerError::Protocol(format!("Invalid JSON: {e}")))?;

    if message.namespace != LEADERBOARD_NAMESPACE {
        return Err(ServerError::Protocol(format!("Unknown namespace '{}'", message.namespace)));
    }
    if !registry.is_connected(connection_id) {
        return Err(ServerError::Internal(format!("Connection {connection_id} not registered")));
    }

    debug!("📨 Routing '{}' from {}", message.event, connection_id);

    match message.event.as_str() {
        "join" => {
            let partition = room_partition(&payload(&message)?)?;
            registry.join(connection_id, &leaderboard_room(&partition)).await;

            let snapshot = broadcaster.snapshot(&partition).await;
            let data = serde_json::to_value(&snapshot)
                .map_err(|e| ServerError::Internal(format!("Snapshot encoding failed: {e}")))?;
            registry.send_to(
                connection_id,
                &ServerMessage {
                    event: client_events::LEADERBOARD_SNAPSHOT.to_string(),
                    data,
                },
            );
        }
        "leave" => {
            let partition = room_partition(&payload(&message)?)?;
            registry.leave(connection_id, &leaderboard_room(&partition)).await;
        }
        "track_player" => {
            let request: PlayerRequest = payload(&message)?;
            registry.join(connection_id, &player_room(request.player_id)).await;
        }
        "untrack_player" => {
            let request: PlayerRequest = payload(&message)?;
            registry.leave(connection_id, &player_room(request.player_id)).await;
        }
        other => {
            return Err(ServerError::Protocol(format!("Unknown event '{other}'")));
        }
    }

    Ok(())
}

fn payload<T: DeserializeOwned>(message: &ClientMessage) -> Result<T, ServerError> {
    serde_json::from_value(message.data.clone())
        .map_err(|e| ServerError::Protocol(format!("Invalid '{}' payload: {e}", message.event)))
}

fn room_partition(request: &RoomRequest) -> Result<PartitionKey, ServerError> {
    let partition = request.partition();
    partition
        .validate()
        .map_err(|e| ServerError::Protocol(e.to_string()))?;
    Ok(partition)
}
