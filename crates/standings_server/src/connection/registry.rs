//! Local connection and room registry.
//!
//! Tracks which local connections exist and which rooms they joined. Each
//! connection is an unbounded outbound queue of encoded [`ServerMessage`]s;
//! the socket layer in front of the server drains it.

use crate::messaging::ServerMessage;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use standings_core::{ConnectionId, RoomBroadcaster};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, mpsc::UnboundedSender<String>>,
    rooms: DashMap<String, HashSet<ConnectionId>>,
    next_id: AtomicU64,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            rooms: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a new connection and returns its outbound queue.
    pub fn register(&self) -> (ConnectionId, mpsc::UnboundedReceiver<String>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::unbounded_channel();
        self.connections.insert(id, sender);
        debug!("🔗 Registered connection {}", id);
        (id, receiver)
    }

    /// Removes a connection and its room memberships.
    pub fn unregister(&self, id: ConnectionId) {
        self.connections.remove(&id);
        self.rooms.retain(|_, members| {
            members.remove(&id);
            !members.is_empty()
        });
        debug!("🔌 Unregistered connection {}", id);
    }

    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn room_size(&self, room: &str) -> usize {
        self.rooms.get(room).map(|members| members.len()).unwrap_or(0)
    }

    /// Rooms `id` is currently in, sorted.
    pub fn rooms_of(&self, id: ConnectionId) -> Vec<String> {
        let mut rooms: Vec<String> = self
            .rooms
            .iter()
            .filter(|entry| entry.value().contains(&id))
            .map(|entry| entry.key().clone())
            .collect();
        rooms.sort();
        rooms
    }

    /// Sends one message to one connection.
    pub fn send_to(&self, id: ConnectionId, message: &ServerMessage) -> bool {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                warn!("⚠️ Could not encode message for {}: {}", id, e);
                return false;
            }
        };
        self.send_text(id, text)
    }

    fn send_text(&self, id: ConnectionId, text: String) -> bool {
        let delivered = self
            .connections
            .get(&id)
            .map(|sender| sender.send(text).is_ok())
            .unwrap_or(false);
        if !delivered && self.connections.contains_key(&id) {
            // The socket side dropped its queue; treat it as a disconnect.
            self.unregister(id);
        }
        delivered
    }
}

#[async_trait]
impl RoomBroadcaster for ConnectionRegistry {
    async fn join(&self, connection: ConnectionId, room: &str) -> bool {
        if !self.is_connected(connection) {
            warn!("⚠️ Unknown connection {} tried to join {}", connection, room);
            return false;
        }
        self.rooms.entry(room.to_string()).or_default().insert(connection)
    }

    async fn leave(&self, connection: ConnectionId, room: &str) -> bool {
        let Some(mut members) = self.rooms.get_mut(room) else {
            return false;
        };
        let removed = members.remove(&connection);
        let now_empty = members.is_empty();
        drop(members);
        if now_empty {
            self.rooms.remove_if(room, |_, members| members.is_empty());
        }
        removed
    }

    async fn emit_to_room(&self, room: &str, event: &str, payload: &Value) -> usize {
        let members: Vec<ConnectionId> = match self.rooms.get(room) {
            Some(members) => members.iter().copied().collect(),
            None => return 0,
        };

        let message = ServerMessage {
            event: event.to_string(),
            data: payload.clone(),
        };
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                warn!("⚠️ Could not encode {} for room {}: {}", event, room, e);
                return 0;
            }
        };

        members
            .into_iter()
            .filter(|id| self.send_text(*id, text.clone()))
            .count()
    }
}
