//! # Standings Server - Fleet-Wide Live Leaderboards
//!
//! The process-level half of the standings backend. It composes the ranking
//! engine from `standings_core` into a server that any number of identical,
//! stateless instances can run behind a load balancer.
//!
//! ## Architecture Overview
//!
//! * **Composition root** - [`StandingsServer`] builds the cache, event bus,
//!   ranking service, broadcaster and relay from injected [`Transports`]
//! * **Connection registry** - [`ConnectionRegistry`] tracks client
//!   connections and room membership and delivers room pushes
//! * **Message routing** - [`route_client_message`] applies client
//!   subscription requests (`join`, `leave`, `track_player`, `untrack_player`)
//! * **Sweep scheduler** - re-sweeps and re-broadcasts every tracked partition
//!   on a fixed interval
//!
//! ### Match flow
//!
//! 1. [`StandingsServer::complete_match`] records every participant's result
//! 2. The match is pushed to local watchers and published on the bus
//! 3. Each touched partition is re-swept; movers get personal rank notices
//! 4. The broadcaster diffs the top of the leaderboard and pushes the change
//!    set to every instance's clients
//!
//! ## Client protocol
//!
//! Clients send `{namespace, event, data}` JSON objects and receive
//! `{event, data}` pushes:
//!
//! ```json
//! { "namespace": "leaderboard", "event": "join", "data": { "scope": "global" } }
//! { "event": "leaderboard:snapshot", "data": { "scope": "global", "entries": [] } }
//! ```
//!
//! ## Error Handling
//!
//! Failures are reported as [`ServerError`]. Cache faults never surface here;
//! bus faults surface only when the server cannot join the fleet.

pub mod config;
pub mod connection;
pub mod error;
pub mod messaging;
pub mod server;

pub use config::ServerConfig;
pub use connection::ConnectionRegistry;
pub use error::ServerError;
pub use messaging::{route_client_message, ClientMessage, PlayerRequest, RoomRequest, ServerMessage, LEADERBOARD_NAMESPACE};
pub use server::{MatchCompletion, Refresh, ServerStats, StandingsServer, Transports};
