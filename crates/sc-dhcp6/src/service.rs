//! Periodic driver for the client engine.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::info;

use crate::client::Dhcp6Client;

/// Run the engine's 1 Hz tick loop. The engine itself spawns no tasks;
/// this is the only thing that drives its timers.
pub async fn run(client: Arc<Dhcp6Client>) -> Result<()> {
    info!("DHCPv6 client engine started");

    let start = Instant::now();
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        client.tick(start.elapsed().as_millis() as u64);
    }
}
