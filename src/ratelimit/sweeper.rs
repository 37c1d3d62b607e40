//! Background eviction of idle keys.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::limiter::RateLimiter;

/// Spawn a task that calls [`RateLimiter::sweep_idle`] every `interval`.
///
/// The task exits once `shutdown` receives `true` or its sender is dropped.
pub fn spawn_sweeper(
    limiter: Arc<RateLimiter>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        info!(interval_ms = interval.as_millis() as u64, "Idle key sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = limiter.sweep_idle();
                    if evicted > 0 {
                        info!(evicted = evicted, keys = limiter.key_count(), "Evicted idle keys");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Idle key sweeper stopping");
                        break;
                    }
                }
            }
        }
    })
}
