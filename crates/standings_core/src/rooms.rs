//! Room delivery port.
//!
//! The broadcaster never touches sockets. It names a room and hands a payload
//! to a [`RoomBroadcaster`], which knows which local connections are in it.

use crate::types::{PartitionKey, PlayerId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Mutex;

/// Client-facing event names.
pub mod client_events {
    pub const LEADERBOARD_UPDATE: &str = "leaderboard:update";
    pub const LEADERBOARD_SNAPSHOT: &str = "leaderboard:snapshot";
    pub const MATCH_COMPLETED: &str = "match:completed";
    pub const RANK_CHANGED: &str = "rank:changed";
}

/// Identifier of one local client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Room carrying leaderboard pushes for a partition.
pub fn leaderboard_room(partition: &PartitionKey) -> String {
    match &partition.season_id {
        Some(season) => format!("leaderboard:{}/{}", partition.scope, season),
        None => format!("leaderboard:{}", partition.scope),
    }
}

/// Personal room of a player.
pub fn player_room(player_id: PlayerId) -> String {
    format!("player:{player_id}")
}

/// Local room membership and delivery.
#[async_trait]
pub trait RoomBroadcaster: Send + Sync {
    /// Adds `connection` to `room`. Returns `false` if it was already there.
    async fn join(&self, connection: ConnectionId, room: &str) -> bool;

    /// Removes `connection` from `room`. Returns `false` if it was not there.
    async fn leave(&self, connection: ConnectionId, room: &str) -> bool;

    /// Sends `event` with `payload` to every member of `room`, returning how
    /// many connections it reached.
    async fn emit_to_room(&self, room: &str, event: &str, payload: &Value) -> usize;
}

/// A delivery observed by [`RecordingRooms`].
#[derive(Debug, Clone, PartialEq)]
pub struct RoomEmit {
    pub room: String,
    pub event: String,
    pub payload: Value,
    pub reached: usize,
}

/// [`RoomBroadcaster`] that only records what it was asked to deliver.
#[derive(Debug, Default)]
pub struct RecordingRooms {
    members: Mutex<HashMap<String, HashSet<ConnectionId>>>,
    emitted: Mutex<Vec<RoomEmit>>,
}

impl RecordingRooms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emitted(&self) -> Vec<RoomEmit> {
        self.emitted.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn emitted_to(&self, room: &str) -> Vec<RoomEmit> {
        self.emitted().into_iter().filter(|e| e.room == room).collect()
    }

    pub fn members(&self, room: &str) -> usize {
        self.members
            .lock()
            .map(|m| m.get(room).map(HashSet::len).unwrap_or(0))
            .unwrap_or(0)
    }
}

#[async_trait]
impl RoomBroadcaster for RecordingRooms {
    async fn join(&self, connection: ConnectionId, room: &str) -> bool {
        match self.members.lock() {
            Ok(mut members) => members.entry(room.to_string()).or_default().insert(connection),
            Err(_) => false,
        }
    }

    async fn leave(&self, connection: ConnectionId, room: &str) -> bool {
        match self.members.lock() {
            Ok(mut members) => members.get_mut(room).map(|m| m.remove(&connection)).unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn emit_to_room(&self, room: &str, event: &str, payload: &Value) -> usize {
        let reached = self.members(room);
        if let Ok(mut emitted) = self.emitted.lock() {
            emitted.push(RoomEmit {
                room: room.to_string(),
                event: event.to_string(),
                payload: payload.clone(),
                reached,
            });
        }
        reached
    }
}
