//! Connection management for local client connections.
//!
//! The registry tracks connections and room membership, and is the
//! [`RoomBroadcaster`](standings_core::RoomBroadcaster) the broadcaster
//! delivers through.

pub mod registry;

pub use registry::ConnectionRegistry;
