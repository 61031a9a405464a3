//! Client heartbeat agent: periodic liveness report plus config pull.
//!
//! One agent per display instance. The loop sends a heartbeat immediately on
//! start and then every interval; each heartbeat is awaited (bounded by the
//! request timeout) before the next tick, so heartbeats never overlap.
//! Failures are logged and the loop carries on.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fleetsync_core::FleetError;
use fleetsync_core::protocol::{ConfigUpdate, HeartbeatRequest};
use fleetsync_core::types::{
    ActiveCounts, ChangeDetails, ChangeType, ClientMetadata, ClientType, ConfigSnapshot,
    ConfigVersion,
};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;

use crate::transport::SyncTransport;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_END_SESSION_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub client_type: ClientType,
    pub current_page: String,
    pub metadata: ClientMetadata,
    pub interval: Duration,
    pub request_timeout: Duration,
    pub end_session_timeout: Duration,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            client_type: ClientType::Kiosk,
            current_page: "/".to_owned(),
            metadata: ClientMetadata::default(),
            interval: DEFAULT_HEARTBEAT_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            end_session_timeout: DEFAULT_END_SESSION_TIMEOUT,
        }
    }
}

/// Handed to the update listener after a pushed config has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigUpdateNotice {
    pub version: ConfigVersion,
    pub config: ConfigSnapshot,
    /// Advisory: e.g. toast instead of a silent badge.
    pub immediate: bool,
    pub change_type: Option<ChangeType>,
    pub change_details: Option<ChangeDetails>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    UpToDate,
    Updated(ConfigVersion),
    Failed(FleetError),
}

pub type UpdateListener = Box<dyn FnMut(ConfigUpdateNotice) + Send>;

pub struct HeartbeatAgent<T: SyncTransport> {
    transport: Arc<T>,
    client_id: String,
    settings: AgentSettings,
    last_config_version: ConfigVersion,
    config: Option<ConfigSnapshot>,
    last_counts: Option<ActiveCounts>,
    listener: UpdateListener,
}

impl<T: SyncTransport> HeartbeatAgent<T> {
    pub fn new(
        transport: Arc<T>,
        client_id: impl Into<String>,
        settings: AgentSettings,
        listener: impl FnMut(ConfigUpdateNotice) + Send + 'static,
    ) -> Self {
        Self {
            transport,
            client_id: client_id.into(),
            settings,
            last_config_version: 0,
            config: None,
            last_counts: None,
            listener: Box::new(listener),
        }
    }

    /// Resume from a previously applied version.
    #[must_use]
    pub fn with_last_config_version(mut self, version: ConfigVersion) -> Self {
        self.last_config_version = version;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn last_config_version(&self) -> ConfigVersion {
        self.last_config_version
    }

    /// Locally applied configuration, if any push has arrived.
    pub fn config(&self) -> Option<&ConfigSnapshot> {
        self.config.as_ref()
    }

    pub fn last_counts(&self) -> Option<&ActiveCounts> {
        self.last_counts.as_ref()
    }

    pub fn set_current_page(&mut self, page: impl Into<String>) {
        self.settings.current_page = page.into();
    }

    /// Send one heartbeat and apply any pushed configuration.
    pub async fn tick(&mut self) -> HeartbeatOutcome {
        let req = HeartbeatRequest {
            client_id: self.client_id.clone(),
            client_type: self.settings.client_type,
            current_page: self.settings.current_page.clone(),
            metadata: self.settings.metadata.clone(),
            timestamp: Some(Utc::now()),
            last_config_version: self.last_config_version,
        };

        let result = timeout(self.settings.request_timeout, self.transport.heartbeat(req))
            .await
            .unwrap_or(Err(FleetError::Timeout));

        match result {
            Ok(resp) => {
                self.last_counts = Some(resp.active_sessions);
                self.apply(resp.config_update)
            }
            Err(e) => {
                tracing::warn!(client_id = %self.client_id, error = %e, "heartbeat failed");
                HeartbeatOutcome::Failed(e)
            }
        }
    }

    fn apply(&mut self, update: ConfigUpdate) -> HeartbeatOutcome {
        if !update.required {
            return HeartbeatOutcome::UpToDate;
        }
        let (Some(version), Some(config)) = (update.new_version, update.config) else {
            tracing::warn!(client_id = %self.client_id, "config update without version or snapshot");
            return HeartbeatOutcome::Failed(FleetError::Transport(
                "configUpdate missing newVersion or config".to_owned(),
            ));
        };
        // A lower version means the server restarted with a new epoch; adopt it.
        if version == self.last_config_version {
            return HeartbeatOutcome::UpToDate;
        }

        tracing::info!(
            client_id = %self.client_id,
            from = self.last_config_version,
            to = version,
            change_type = ?update.change_type,
            "applied configuration update"
        );
        self.last_config_version = version;
        self.config = Some(config.clone());

        (self.listener)(ConfigUpdateNotice {
            version,
            config,
            immediate: update.immediate.unwrap_or(false),
            change_type: update.change_type,
            change_details: update.change_details,
            reason: update.reason,
        });
        HeartbeatOutcome::Updated(version)
    }

    /// Heartbeat loop. Returns the agent once `cancel` fires; a response that
    /// arrives after cancellation is discarded.
    pub async fn run(mut self, cancel: CancellationToken) -> Self {
        let mut ticker = interval(self.settings.interval);
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
                _ = self.tick() => false,
            };
            if torn_down {
                tracing::debug!(client_id = %self.client_id, "torn down mid-heartbeat, response ignored");
                break;
            }
        }
        self
    }

    /// Start the loop on its own task.
    pub fn spawn(self) -> AgentHandle<T> {
        let cancel = CancellationToken::new();
        let transport = Arc::clone(&self.transport);
        let client_id = self.client_id.clone();
        let end_session_timeout = self.settings.end_session_timeout;
        let task = tokio::spawn(self.run(cancel.clone()));
        AgentHandle {
            cancel,
            task,
            transport,
            client_id,
            end_session_timeout,
        }
    }
}

/// Running agent. Dropping it without [`AgentHandle::shutdown`] leaves the
/// loop running.
pub struct AgentHandle<T: SyncTransport> {
    cancel: CancellationToken,
    task: JoinHandle<HeartbeatAgent<T>>,
    transport: Arc<T>,
    client_id: String,
    end_session_timeout: Duration,
}

impl<T: SyncTransport> AgentHandle<T> {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the loop and fire one end-session call without waiting for it.
    ///
    /// The returned handle may be awaited by a process about to exit; the
    /// call is bounded by the end-session timeout either way.
    pub fn shutdown(self) -> JoinHandle<()> {
        self.cancel.cancel();
        fire_end_session(self.transport, self.client_id, self.end_session_timeout)
    }
}

/// Best-effort end-session. Failures, including not-found, are not escalated.
pub fn fire_end_session<T: SyncTransport>(
    transport: Arc<T>,
    client_id: String,
    limit: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match timeout(limit, transport.end_session(&client_id)).await {
            Ok(Ok(())) => tracing::debug!(client_id = %client_id, "session ended"),
            Ok(Err(e)) => tracing::debug!(client_id = %client_id, error = %e, "end session failed"),
            Err(_) => tracing::debug!(client_id = %client_id, "end session timed out"),
        }
    })
}
