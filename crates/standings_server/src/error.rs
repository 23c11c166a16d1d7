//! Server error types.

use standings_core::{BusError, RankingError};

/// Errors surfaced by the standings server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The runtime configuration is invalid
    #[error("Configuration error: {0}")]
    Config(String),
    /// A client message could not be understood
    #[error("Protocol error: {0}")]
    Protocol(String),
    /// A ranking operation failed
    #[error(transparent)]
    Ranking(#[from] RankingError),
    /// The event bus failed
    #[error(transparent)]
    Bus(#[from] BusError),
    /// Internal server error (invalid state, stopped server, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}
