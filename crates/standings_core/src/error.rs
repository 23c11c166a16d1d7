//! Error types for the ranking subsystem.
//!
//! Each port has its own error enum so adapters can report transport-level
//! failures without knowing about the services built on top of them.
//! [`RankingError`] is what callers of the services see.

use crate::types::{InvalidPartition, PlayerId};

/// Failures from a cache transport.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The cache could not be reached
    #[error("Cache unavailable: {0}")]
    Unavailable(String),
    /// The operation did not complete within the configured budget
    #[error("Cache operation timed out after {0}ms")]
    Timeout(u64),
    /// Stored bytes could not be decoded
    #[error("Cache payload corrupt: {0}")]
    Corrupt(String),
}

/// Failures from the authoritative rank store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    /// A batch write was rejected; nothing from the batch was applied
    #[error("Batch update rejected: {0}")]
    BatchRejected(String),
    /// Inserting an entry that already exists for the partition
    #[error("Entry already exists for player {0}")]
    Duplicate(PlayerId),
    /// Writing to an entry that does not exist
    #[error("No entry for player {0}")]
    Missing(PlayerId),
}

/// Failures from the pub/sub transport or the event bus above it.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The transport is not connected
    #[error("Bus transport disconnected")]
    Disconnected,
    /// A single publish attempt failed
    #[error("Publish to '{channel}' failed: {reason}")]
    PublishFailed { channel: String, reason: String },
    /// Every retry attempt failed; the event was dropped
    #[error("Publish to '{channel}' failed after {attempts} attempts: {last_error}")]
    PublishExhausted {
        channel: String,
        attempts: u32,
        last_error: String,
    },
    /// Subscribing to a channel failed
    #[error("Subscribe to '{channel}' failed: {reason}")]
    SubscribeFailed { channel: String, reason: String },
    /// The event could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures while decoding or dispatching an inbound event.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The raw message is not a valid envelope
    #[error("Malformed envelope: {0}")]
    Malformed(String),
    /// The envelope is valid but the payload does not match its type
    #[error("Payload does not match event type '{event_type}': {reason}")]
    PayloadMismatch { event_type: String, reason: String },
    /// A subscriber callback failed
    #[error("Handler execution error: {0}")]
    HandlerExecution(String),
}

/// Errors surfaced by the ranking services.
#[derive(Debug, thiserror::Error)]
pub enum RankingError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    InvalidPartition(#[from] InvalidPartition),
    /// No active entry for the player in the partition
    #[error("No active entry for player {player_id} in {partition}")]
    EntryNotFound { player_id: PlayerId, partition: String },
    /// A caller-supplied argument was out of range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}
