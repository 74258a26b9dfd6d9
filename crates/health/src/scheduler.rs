use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};

use crate::{error::HealthError, monitor::HealthMonitor};

/// Starts a non-notifying sweep every `every`, first one after a full period.
pub(crate) async fn run(monitor: HealthMonitor, every: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match monitor.sweep(false).await {
            Ok(()) => log::info!("Scheduled channel sweep started"),
            Err(HealthError::AlreadyRunning) => log::debug!("Skipping scheduled sweep, previous one still running"),
            Err(e) => log::error!("Scheduled channel sweep failed to start: {e}"),
        }
    }
}
