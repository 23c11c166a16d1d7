//! Message type definitions for client-server communication.

use serde::{Deserialize, Serialize};
use standings_core::{PartitionKey, PlayerId, Scope};

/// Namespace that carries leaderboard subscriptions.
pub const LEADERBOARD_NAMESPACE: &str = "leaderboard";

/// A message sent from a client to the server.
///
/// ```json
/// {
///   "namespace": "leaderboard",
///   "event": "join",
///   "data": { "scope": "regional:eu", "seasonId": "s4" }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    pub namespace: String,
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// A message pushed from the server to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    pub event: String,
    pub data: serde_json::Value,
}

/// Payload of `join` and `leave`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRequest {
    pub scope: Scope,
    #[serde(default)]
    pub season_id: Option<String>,
}

impl RoomRequest {
    pub fn partition(&self) -> PartitionKey {
        PartitionKey::new(self.scope.clone(), self.season_id.clone())
    }
}

/// Payload of `track_player` and `untrack_player`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRequest {
    pub player_id: PlayerId,
}
