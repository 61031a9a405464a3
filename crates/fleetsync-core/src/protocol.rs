//! Wire types for the heartbeat/session/admin contract.
//!
//! Field names are camelCase on the wire. Method names are listed in
//! [`methods`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{
    ActiveCounts, ChangeDetails, ChangeType, ClientMetadata, ClientType, ConfigSnapshot,
    ConfigVersion, MaintenanceMode, ModuleSettings,
};

/// JSON-RPC method names.
pub mod methods {
    pub const HEARTBEAT: &str = "heartbeat";
    pub const SESSION_END: &str = "session.end";
    pub const CONFIG_PUBLIC: &str = "config.public";
    pub const ADMIN_MODULE_TOGGLE: &str = "admin.module.toggle";
    pub const ADMIN_MODULES_BULK: &str = "admin.modules.bulk";
    pub const ADMIN_MAINTENANCE: &str = "admin.maintenance";
    pub const ADMIN_CONFIG: &str = "admin.config";
    pub const SESSIONS_STATS: &str = "sessions.stats";
    pub const SESSIONS_ACTIVE: &str = "sessions.active";
}

// ─── Heartbeat ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    /// Empty means the caller omitted it; the handler rejects that.
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_type: ClientType,
    #[serde(default)]
    pub current_page: String,
    #[serde(flatten)]
    pub metadata: ClientMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_config_version: ConfigVersion,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdate {
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub immediate: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_version: Option<ConfigVersion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_type: Option<ChangeType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_details: Option<ChangeDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ConfigUpdate {
    pub fn not_required() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub active_sessions: ActiveCounts,
    pub config_update: ConfigUpdate,
}

// ─── Session end ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndSessionRequest {
    pub client_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndSessionResponse {
    pub ok: bool,
    /// False when the session was already gone. Still a success.
    pub removed: bool,
}

// ─── Public config ────────────────────────────────────────────────

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicConfig {
    pub maintenance_mode: MaintenanceMode,
}

// ─── Admin ────────────────────────────────────────────────────────

fn default_actor() -> String {
    "admin".to_owned()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminAuth {
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_actor")]
    pub actor: String,
}

impl AdminAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            actor: default_actor(),
        }
    }

    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleToggleRequest {
    #[serde(flatten)]
    pub auth: AdminAuth,
    pub module_key: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleToggleResponse {
    pub message: String,
    pub notified_sessions: usize,
    pub version: ConfigVersion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkModuleUpdateRequest {
    #[serde(flatten)]
    pub auth: AdminAuth,
    pub modules: BTreeMap<String, ModuleSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkModuleUpdateResponse {
    pub notified_sessions: usize,
    pub version: ConfigVersion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceToggleRequest {
    #[serde(flatten)]
    pub auth: AdminAuth,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceToggleResponse {
    pub message: String,
    pub notified_sessions: usize,
    pub maintenance_mode: MaintenanceMode,
    pub version: ConfigVersion,
}
