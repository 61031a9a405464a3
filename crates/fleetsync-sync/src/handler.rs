//! Synchronization protocol handler: ties the session registry and the
//! configuration store to the heartbeat/admin contract.
//!
//! Each store sits behind its own lock. No method holds both locks at once;
//! a heartbeat writes the registry first, then reads the config.

use std::sync::Arc;

use fleetsync_config::ConfigStore;
use fleetsync_core::FleetError;
use fleetsync_core::protocol::{
    AdminAuth, BulkModuleUpdateRequest, BulkModuleUpdateResponse, ConfigUpdate,
    EndSessionResponse, HeartbeatRequest, HeartbeatResponse, MaintenanceToggleRequest,
    MaintenanceToggleResponse, ModuleToggleRequest, ModuleToggleResponse, PublicConfig,
};
use fleetsync_core::types::{
    ActiveSessionView, ClientType, ConfigVersion, ConfigurationVersion, SessionStats,
};
use fleetsync_registry::{SessionRegistry, Sighting};
use tokio::sync::Mutex;

use crate::clock::{Clock, SystemClock};

/// Cloneable handle shared by every connection task.
#[derive(Clone)]
pub struct SyncHandler {
    registry: Arc<Mutex<SessionRegistry>>,
    config: Arc<Mutex<ConfigStore>>,
    admin_token: Arc<str>,
    clock: Arc<dyn Clock>,
}

impl SyncHandler {
    pub fn new(registry: SessionRegistry, config: ConfigStore, admin_token: impl Into<String>) -> Self {
        Self::with_clock(registry, config, admin_token, Arc::new(SystemClock))
    }

    pub fn with_clock(
        registry: SessionRegistry,
        config: ConfigStore,
        admin_token: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let admin_token: String = admin_token.into();
        Self {
            registry: Arc::new(Mutex::new(registry)),
            config: Arc::new(Mutex::new(config)),
            admin_token: admin_token.into(),
            clock,
        }
    }

    /// Registry handle for the sweeper, which must share the heartbeat lock.
    pub fn registry(&self) -> Arc<Mutex<SessionRegistry>> {
        Arc::clone(&self.registry)
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub async fn config_version(&self) -> ConfigVersion {
        self.config.lock().await.version()
    }

    // ─── Public operations ───────────────────────────────────────────

    /// Record liveness and decide whether the caller needs a config push.
    ///
    /// Only kiosks whose `last_config_version` differs from the current
    /// version get `required = true`; every other caller gets liveness
    /// tracking only.
    pub async fn heartbeat(
        &self,
        req: HeartbeatRequest,
        source_address: Option<String>,
    ) -> Result<HeartbeatResponse, FleetError> {
        // The id is opaque: stored exactly as sent, rejected only when blank.
        if req.client_id.trim().is_empty() {
            return Err(FleetError::MalformedHeartbeat("missing clientId".to_owned()));
        }
        let client_id = req.client_id;

        let now = self.clock.now();
        let client_type = req.client_type;
        let last_seen = req.last_config_version;
        let sighting = Sighting {
            client_id: client_id.clone(),
            client_type,
            current_page: req.current_page,
            metadata: req.metadata,
            source_address,
        };

        let active_sessions = self.registry.lock().await.register_or_refresh(sighting, now);

        let config_update = if client_type.receives_config() {
            let store = self.config.lock().await;
            build_config_update(&store, last_seen)
        } else {
            ConfigUpdate::not_required()
        };

        if config_update.required {
            tracing::debug!(
                client_id = %client_id,
                last_seen,
                new_version = ?config_update.new_version,
                "pushing configuration update"
            );
        }

        Ok(HeartbeatResponse {
            active_sessions,
            config_update,
        })
    }

    /// Idempotent: an unknown client id is a successful no-op.
    pub async fn end_session(&self, client_id: &str) -> EndSessionResponse {
        let removed = self.registry.lock().await.end_session(client_id);
        tracing::debug!(client_id, removed, "session end");
        EndSessionResponse { ok: true, removed }
    }

    /// Unauthenticated maintenance-mode read.
    pub async fn public_config(&self) -> PublicConfig {
        PublicConfig {
            maintenance_mode: self.config.lock().await.maintenance_mode().clone(),
        }
    }

    // ─── Admin operations ────────────────────────────────────────────

    pub async fn toggle_module(
        &self,
        req: ModuleToggleRequest,
    ) -> Result<ModuleToggleResponse, FleetError> {
        self.authorize(&req.auth)?;
        let now = self.clock.now();
        let version = self.config.lock().await.apply_module_toggle(
            &req.module_key,
            req.enabled,
            &req.auth.actor,
            req.reason,
            now,
        )?;

        Ok(ModuleToggleResponse {
            message: format!(
                "Module '{}' {}",
                req.module_key,
                if req.enabled { "enabled" } else { "disabled" }
            ),
            notified_sessions: self.live_kiosks().await,
            version,
        })
    }

    pub async fn bulk_update_modules(
        &self,
        req: BulkModuleUpdateRequest,
    ) -> Result<BulkModuleUpdateResponse, FleetError> {
        self.authorize(&req.auth)?;
        let now = self.clock.now();
        let version = self.config.lock().await.apply_bulk_module_update(
            req.modules,
            &req.auth.actor,
            req.reason,
            now,
        )?;

        Ok(BulkModuleUpdateResponse {
            notified_sessions: self.live_kiosks().await,
            version,
        })
    }

    pub async fn toggle_maintenance(
        &self,
        req: MaintenanceToggleRequest,
    ) -> Result<MaintenanceToggleResponse, FleetError> {
        self.authorize(&req.auth)?;
        let now = self.clock.now();
        let (version, maintenance_mode) = {
            let mut store = self.config.lock().await;
            let version = store.apply_maintenance_toggle(
                req.enabled,
                req.message,
                req.eta,
                &req.auth.actor,
                req.reason,
                now,
            )?;
            (version, store.maintenance_mode().clone())
        };

        Ok(MaintenanceToggleResponse {
            message: format!(
                "Maintenance mode {}",
                if req.enabled { "enabled" } else { "disabled" }
            ),
            notified_sessions: self.live_kiosks().await,
            maintenance_mode,
            version,
        })
    }

    pub async fn current_config(&self, auth: &AdminAuth) -> Result<ConfigurationVersion, FleetError> {
        self.authorize(auth)?;
        Ok(self.config.lock().await.current().clone())
    }

    pub async fn stats(&self, auth: &AdminAuth) -> Result<SessionStats, FleetError> {
        self.authorize(auth)?;
        let now = self.clock.now();
        Ok(self.registry.lock().await.compute_stats(now))
    }

    pub async fn active_sessions(&self, auth: &AdminAuth) -> Result<Vec<ActiveSessionView>, FleetError> {
        self.authorize(auth)?;
        let now = self.clock.now();
        Ok(self.registry.lock().await.list_active(now))
    }

    // ─── Internals ───────────────────────────────────────────────────

    /// Checked before any state is touched, so a rejected call never bumps
    /// the version. An empty configured token disables admin access.
    fn authorize(&self, auth: &AdminAuth) -> Result<(), FleetError> {
        if self.admin_token.is_empty() || auth.token != *self.admin_token {
            tracing::warn!(actor = %auth.actor, "rejected admin request");
            return Err(FleetError::Unauthorized);
        }
        Ok(())
    }

    async fn live_kiosks(&self) -> usize {
        let now = self.clock.now();
        self.registry
            .lock()
            .await
            .active_counts(now)
            .of(ClientType::Kiosk)
    }
}

/// Full snapshot plus the latest change's metadata whenever the caller's
/// version differs from the current one. A caller ahead of the server holds
/// a version from an earlier run and must resync too.
fn build_config_update(store: &ConfigStore, last_seen: ConfigVersion) -> ConfigUpdate {
    let current = store.current();
    if last_seen == current.version {
        return ConfigUpdate::not_required();
    }

    let change = store.last_change();
    ConfigUpdate {
        required: true,
        immediate: Some(change.is_some_and(|c| c.immediate)),
        new_version: Some(current.version),
        config: Some(current.snapshot.clone()),
        change_type: change.map(|c| c.change_type),
        change_details: change.map(|c| c.change_details.clone()),
        reason: change.map(|c| c.reason.clone()),
    }
}
