//! Maintenance gate: an independent poll of the public maintenance flag.
//!
//! Runs separately from the heartbeat so a display that has not registered
//! yet still learns about maintenance. The gate is **fail-open**: when the
//! poll itself fails, maintenance is treated as off and content keeps
//! rendering. Availability of content is preferred over strict gating.

use std::sync::Arc;
use std::time::Duration;

use fleetsync_core::types::MaintenanceMode;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;

use crate::transport::SyncTransport;

pub const DEFAULT_MAINTENANCE_POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum GateState {
    /// Render normally.
    #[default]
    Open,
    /// Suppress rendering and show the maintenance screen.
    Blocked {
        message: Option<String>,
        eta: Option<String>,
    },
}

impl GateState {
    pub fn allows_rendering(&self) -> bool {
        matches!(self, Self::Open)
    }

    fn from_mode(mode: &MaintenanceMode) -> Self {
        if !mode.enabled {
            return Self::Open;
        }
        Self::Blocked {
            message: mode.message.clone(),
            eta: mode.show_eta.then(|| mode.eta.clone()).flatten(),
        }
    }
}

pub struct MaintenanceGate<T: SyncTransport> {
    transport: Arc<T>,
    interval: Duration,
    request_timeout: Duration,
    state: watch::Sender<GateState>,
}

impl<T: SyncTransport> MaintenanceGate<T> {
    pub fn new(transport: Arc<T>) -> Self {
        let (state, _) = watch::channel(GateState::Open);
        Self {
            transport,
            interval: DEFAULT_MAINTENANCE_POLL_INTERVAL,
            request_timeout: DEFAULT_MAINTENANCE_POLL_INTERVAL,
            state,
        }
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self.request_timeout = interval;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<GateState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> GateState {
        self.state.borrow().clone()
    }

    /// Poll once and publish the result. A failed poll publishes `Open`.
    pub async fn poll_once(&self) -> GateState {
        let polled = timeout(self.request_timeout, self.transport.public_config()).await;
        let next = match polled {
            Ok(Ok(public)) => GateState::from_mode(&public.maintenance_mode),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "maintenance poll failed, failing open");
                GateState::Open
            }
            Err(_) => {
                tracing::warn!("maintenance poll timed out, failing open");
                GateState::Open
            }
        };

        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            tracing::info!(from = ?current, to = ?next, "maintenance gate changed");
            *current = next.clone();
            true
        });
        next
    }

    /// Poll immediately, then every interval, until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let torn_down = tokio::select! {
                biased;
                _ = cancel.cancelled() => true,
                _ = self.poll_once() => false,
            };
            if torn_down {
                break;
            }
        }
        tracing::debug!("maintenance gate stopped");
    }
}
