//! Staleness sweeper: expires lapsed sessions on its own timer, off the
//! request path, through the same registry lock heartbeats use.

use std::sync::Arc;
use std::time::Duration;

use fleetsync_registry::SessionRegistry;
use tokio::sync::Mutex;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;

/// Default sweep period.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Run one sweep. Returns the expired client ids.
pub async fn sweep_once(registry: &Mutex<SessionRegistry>, clock: &dyn Clock) -> Vec<String> {
    let now = clock.now();
    let expired = registry.lock().await.expire_stale(now);
    for client_id in &expired {
        tracing::info!(client_id = %client_id, "session expired");
    }
    expired
}

/// Sweep every `every` until `cancel` fires.
pub async fn run_sweeper(
    registry: Arc<Mutex<SessionRegistry>>,
    clock: Arc<dyn Clock>,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let expired = sweep_once(&registry, clock.as_ref()).await;
                if !expired.is_empty() {
                    tracing::debug!(count = expired.len(), "sweep removed stale sessions");
                }
            }
            _ = cancel.cancelled() => {
                tracing::debug!("sweeper: cancellation requested, stopping");
                break;
            }
        }
    }
}
