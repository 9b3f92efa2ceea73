//! Scheduler task: periodic timeout processing and session reaping.

use std::sync::Arc;
use std::time::Duration;

use comet_core::Registry;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Drive the registry until cancelled.
///
/// Every `tick_interval` each session runs timeout processing (queue expiry,
/// idle pings, empty batch responses) and the reaper sweeps dead sessions.
/// Cancellation runs the final drain: pending batch transports receive `[]`
/// and everything detaches.
pub async fn run_scheduler(
    registry: Arc<Registry>,
    tick_interval: Duration,
    cancel: CancellationToken,
) {
    let mut interval = time::interval(tick_interval);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    info!(interval_ms = tick_interval.as_millis() as u64, "scheduler started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                registry.tick_all();
                registry.reap();
            }
            () = cancel.cancelled() => {
                registry.drain();
                info!("scheduler stopped");
                return;
            }
        }
    }
}
