//! Server composition root and background tasks.

pub mod core;
mod scheduler;

pub use self::core::{MatchCompletion, Refresh, ServerStats, StandingsServer, Transports};
