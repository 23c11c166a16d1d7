//! Local delivery of fleet events.
//!
//! [`FleetRelay`] is the one place where a [`BusEvent`] is matched on. It is
//! subscribed to every bus channel and turns each event into pushes to local
//! rooms. The origin process calls [`FleetRelay::deliver`] directly for its
//! own match and rank events, because the bus drops self-echoes.

use crate::broadcaster::Broadcaster;
use crate::bus::{BusSubscriber, EventBus, InboundEvent, SubscriptionId};
use crate::error::{BusError, EventError};
use crate::events::{channels, BusEvent};
use crate::rooms::{client_events, leaderboard_room, player_room, RoomBroadcaster};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

pub struct FleetRelay {
    broadcaster: Arc<Broadcaster>,
    rooms: Arc<dyn RoomBroadcaster>,
}

impl FleetRelay {
    pub fn new(broadcaster: Arc<Broadcaster>, rooms: Arc<dyn RoomBroadcaster>) -> Arc<Self> {
        Arc::new(Self { broadcaster, rooms })
    }

    /// Subscribes the relay to every fleet channel.
    pub async fn attach(self: &Arc<Self>, bus: &Arc<EventBus>) -> Result<Vec<SubscriptionId>, BusError> {
        let mut ids = Vec::with_capacity(channels::ALL.len());
        for channel in channels::ALL {
            ids.push(bus.subscribe(channel, self.clone()).await?);
        }
        Ok(ids)
    }

    /// Pushes `event` to the local rooms interested in it.
    ///
    /// Returns the number of connections reached.
    pub async fn deliver(&self, event: &BusEvent) -> usize {
        match event {
            BusEvent::LeaderboardUpdate(diff) => self.broadcaster.deliver_remote(diff).await,
            BusEvent::MatchCompleted(result) => {
                let room = leaderboard_room(&result.partition());
                self.emit(&room, client_events::MATCH_COMPLETED, result).await
            }
            BusEvent::RankChanged(notice) => {
                let mut reached = 0;
                for update in &notice.updates {
                    reached += self
                        .emit(&player_room(update.player_id), client_events::RANK_CHANGED, update)
                        .await;
                }
                reached
            }
            BusEvent::InstanceStarted(notice) => {
                info!("🟢 Instance {} joined the fleet", notice.instance_id);
                0
            }
            BusEvent::InstanceStopping(notice) => {
                info!("🔴 Instance {} is leaving the fleet", notice.instance_id);
                0
            }
        }
    }

    async fn emit<T: Serialize>(&self, room: &str, event: &str, payload: &T) -> usize {
        match serde_json::to_value(payload) {
            Ok(payload) => self.rooms.emit_to_room(room, event, &payload).await,
            Err(e) => {
                error!("❌ Could not encode {} for room {}: {}", event, room, e);
                0
            }
        }
    }
}

#[async_trait]
impl BusSubscriber for FleetRelay {
    async fn on_event(&self, event: &InboundEvent) -> Result<(), EventError> {
        self.deliver(&event.event).await;
        Ok(())
    }
}
