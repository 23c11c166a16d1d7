//! Per-key trigger throttle.
//!
//! Tracks, for each throttle key (e.g. `scope:global`), when a trigger was
//! last accepted. A trigger inside the window is rejected and the timestamp
//! is left alone, so a steady stream of triggers still lets one through per
//! window.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

pub struct Throttle {
    window: Duration,
    last_accepted: DashMap<String, Instant>,
}

impl Throttle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: DashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns `true` and records the trigger if `key` is outside its window.
    pub fn try_acquire(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut last = match self.last_accepted.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(now);
                return true;
            }
            Entry::Occupied(slot) => slot,
        };

        if now.duration_since(*last.get()) < self.window {
            return false;
        }
        last.insert(now);
        true
    }

    /// Forgets `key`, letting the next trigger through immediately.
    pub fn reset(&self, key: &str) {
        self.last_accepted.remove(key);
    }

    /// Drops keys idle for longer than `idle`.
    pub fn prune(&self, idle: Duration) {
        let now = Instant::now();
        self.last_accepted
            .retain(|_, last| now.duration_since(*last) < idle);
    }

    pub fn len(&self) -> usize {
        self.last_accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_accepted.is_empty()
    }
}
