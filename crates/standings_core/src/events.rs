//! Cross-process events and their wire envelope.
//!
//! Every message on the bus is an [`EventEnvelope`]:
//! `{type, timestamp, originId, data}`. The `type` tag selects one variant of
//! the closed [`BusEvent`] sum; decoding is a single exhaustive match, so an
//! unknown tag or a payload that does not fit its tag is rejected as
//! malformed instead of reaching subscribers.

use crate::error::{BusError, EventError};
use crate::types::{current_timestamp_ms, LeaderboardDiff, MatchResult, RankUpdate, Scope};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known bus channels.
pub mod channels {
    pub const LEADERBOARD_UPDATES: &str = "leaderboard.updates";
    pub const MATCH_EVENTS: &str = "match.events";
    pub const PLAYER_NOTIFICATIONS: &str = "player.notifications";
    pub const SYSTEM_EVENTS: &str = "system.events";

    pub const ALL: [&str; 4] = [
        LEADERBOARD_UPDATES,
        MATCH_EVENTS,
        PLAYER_NOTIFICATIONS,
        SYSTEM_EVENTS,
    ];
}

/// Tag carried in the envelope's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    LeaderboardUpdate,
    MatchCompleted,
    RankChanged,
    InstanceStarted,
    InstanceStopping,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::LeaderboardUpdate => "leaderboard_update",
            EventType::MatchCompleted => "match_completed",
            EventType::RankChanged => "rank_changed",
            EventType::InstanceStarted => "instance_started",
            EventType::InstanceStopping => "instance_stopping",
        }
    }
}

/// Players whose rank moved during one sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankNotifications {
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season_id: Option<String>,
    pub updates: Vec<RankUpdate>,
}

/// Lifecycle announcement from a server process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceNotice {
    pub instance_id: String,
    pub scopes: Vec<Scope>,
}

/// Every event kind that travels over the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    LeaderboardUpdate(LeaderboardDiff),
    MatchCompleted(MatchResult),
    RankChanged(RankNotifications),
    InstanceStarted(InstanceNotice),
    InstanceStopping(InstanceNotice),
}

impl BusEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            BusEvent::LeaderboardUpdate(_) => EventType::LeaderboardUpdate,
            BusEvent::MatchCompleted(_) => EventType::MatchCompleted,
            BusEvent::RankChanged(_) => EventType::RankChanged,
            BusEvent::InstanceStarted(_) => EventType::InstanceStarted,
            BusEvent::InstanceStopping(_) => EventType::InstanceStopping,
        }
    }

    /// Channel this kind of event is published on.
    pub fn channel(&self) -> &'static str {
        match self {
            BusEvent::LeaderboardUpdate(_) => channels::LEADERBOARD_UPDATES,
            BusEvent::MatchCompleted(_) => channels::MATCH_EVENTS,
            BusEvent::RankChanged(_) => channels::PLAYER_NOTIFICATIONS,
            BusEvent::InstanceStarted(_) | BusEvent::InstanceStopping(_) => channels::SYSTEM_EVENTS,
        }
    }

    fn to_data(&self) -> Result<Value, serde_json::Error> {
        match self {
            BusEvent::LeaderboardUpdate(diff) => serde_json::to_value(diff),
            BusEvent::MatchCompleted(result) => serde_json::to_value(result),
            BusEvent::RankChanged(notice) => serde_json::to_value(notice),
            BusEvent::InstanceStarted(notice) | BusEvent::InstanceStopping(notice) => {
                serde_json::to_value(notice)
            }
        }
    }

    /// Rebuilds an event from its tag and payload.
    pub fn from_parts(event_type: EventType, data: Value) -> Result<Self, EventError> {
        let mismatch = |e: serde_json::Error| EventError::PayloadMismatch {
            event_type: event_type.as_str().to_string(),
            reason: e.to_string(),
        };

        Ok(match event_type {
            EventType::LeaderboardUpdate => {
                BusEvent::LeaderboardUpdate(serde_json::from_value(data).map_err(mismatch)?)
            }
            EventType::MatchCompleted => {
                BusEvent::MatchCompleted(serde_json::from_value(data).map_err(mismatch)?)
            }
            EventType::RankChanged => BusEvent::RankChanged(serde_json::from_value(data).map_err(mismatch)?),
            EventType::InstanceStarted => {
                BusEvent::InstanceStarted(serde_json::from_value(data).map_err(mismatch)?)
            }
            EventType::InstanceStopping => {
                BusEvent::InstanceStopping(serde_json::from_value(data).map_err(mismatch)?)
            }
        })
    }
}

/// Wire envelope. Immutable once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Epoch milliseconds at publish time.
    pub timestamp: i64,
    pub origin_id: String,
    pub data: Value,
}

impl EventEnvelope {
    /// Stamps `event` with the publishing process id and the current time.
    pub fn stamp(event: &BusEvent, origin_id: &str) -> Result<Self, BusError> {
        Ok(Self {
            event_type: event.event_type(),
            timestamp: current_timestamp_ms(),
            origin_id: origin_id.to_string(),
            data: event.to_data()?,
        })
    }

    pub fn encode(&self) -> Result<String, BusError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self, EventError> {
        let envelope: Self = serde_json::from_str(raw).map_err(|e| EventError::Malformed(e.to_string()))?;
        if envelope.origin_id.is_empty() {
            return Err(EventError::Malformed("empty originId".to_string()));
        }
        Ok(envelope)
    }

    pub fn into_event(self) -> Result<BusEvent, EventError> {
        BusEvent::from_parts(self.event_type, self.data)
    }
}
