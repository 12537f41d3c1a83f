use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::engine::{now_ms, Engine};
use crate::limits::TICK_INTERVAL;

/// Background task that recomputes remaining time, fires alarms and pushes
/// a snapshot once per second for the lifetime of the process.
pub async fn run_scheduler(engine: Arc<Engine>) {
    run_scheduler_every(engine, TICK_INTERVAL).await
}

/// Same as [`run_scheduler`] with an explicit period.
pub async fn run_scheduler_every(engine: Arc<Engine>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    // Remaining time is derived from absolute end times, so a late tick
    // just catches up on the next one.
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        let report = engine.tick(now_ms()).await;
        if !report.alarms.is_empty() {
            debug!(
                "tick fired {} alarms across {} reservations",
                report.alarms.len(),
                report.reservations
            );
        }
    }
}
