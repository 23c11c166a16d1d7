//! Periodic sweep scheduler.
//!
//! Every tick re-sweeps and re-broadcasts all tracked partitions. This heals
//! broadcasts dropped after exhausting publish retries and any interleaving of
//! sweeps from different processes.

use super::core::StandingsServer;
use std::sync::Weak;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info};

pub(crate) fn spawn_sweep_scheduler(
    server: Weak<StandingsServer>,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tick_count: u64 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(server) = server.upgrade() else { break };
                    tick_count += 1;
                    let swept = server.sweep_all().await;
                    debug!("🕒 Sweep tick #{} refreshed {} partition(s)", tick_count, swept);
                }
                _ = shutdown.recv() => break,
            }
        }

        info!("🕒 Sweep scheduler stopped after {} tick(s)", tick_count);
    })
}
