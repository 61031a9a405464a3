use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::FleetError;

/// Configuration version number. Starts at 1 for a seeded store.
pub type ConfigVersion = u64;

// ─── Client ───────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    #[default]
    Kiosk,
    Admin,
    Mobile,
    User,
}

impl ClientType {
    pub const ALL: [Self; 4] = [Self::Kiosk, Self::Admin, Self::Mobile, Self::User];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Kiosk => "kiosk",
            Self::Admin => "admin",
            Self::Mobile => "mobile",
            Self::User => "user",
        }
    }

    /// Only displays receive configuration pushes.
    pub fn receives_config(self) -> bool {
        self == Self::Kiosk
    }
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientType {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kiosk" => Ok(Self::Kiosk),
            "admin" => Ok(Self::Admin),
            "mobile" => Ok(Self::Mobile),
            "user" => Ok(Self::User),
            _ => Err(FleetError::MalformedHeartbeat(format!(
                "unknown client type: {s}"
            ))),
        }
    }
}

/// Opaque display metadata reported with each heartbeat.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_resolution: Option<String>,
}

/// Server-side record of one live display/admin instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSession {
    pub client_id: String,
    pub client_type: ClientType,
    pub current_page: String,
    pub metadata: ClientMetadata,
    pub first_seen_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub source_address: Option<String>,
}

/// Live session totals, returned with every heartbeat.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveCounts {
    pub total: usize,
    pub by_client_type: BTreeMap<ClientType, usize>,
}

impl ActiveCounts {
    pub fn of(&self, client_type: ClientType) -> usize {
        self.by_client_type.get(&client_type).copied().unwrap_or(0)
    }
}

// ─── Configuration ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSettings {
    pub enabled: bool,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
}

impl ModuleSettings {
    pub fn new(enabled: bool, label: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            enabled,
            label: label.into(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceMode {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, rename = "showETA")]
    pub show_eta: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationSettings {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplaySettings {
    pub refresh_interval_secs: u64,
    #[serde(default)]
    pub rotation: RotationSettings,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 300,
            rotation: RotationSettings::default(),
        }
    }
}

/// Module/maintenance/display settings shipped to displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSnapshot {
    pub modules: BTreeMap<String, ModuleSettings>,
    #[serde(default)]
    pub maintenance_mode: MaintenanceMode,
    #[serde(default)]
    pub display_settings: DisplaySettings,
}

impl Default for ConfigSnapshot {
    /// The portal's stock module set, all enabled, no maintenance.
    fn default() -> Self {
        let modules = [
            ("news", "News", "Company announcements and bulletins"),
            ("vehicles", "Vehicles", "Pool vehicle booking calendar"),
            ("warehouse", "Warehouse", "Warehouse stock overview"),
            ("employees", "Employees", "Employee directory"),
        ]
        .into_iter()
        .map(|(key, label, desc)| (key.to_owned(), ModuleSettings::new(true, label, desc)))
        .collect();

        Self {
            modules,
            maintenance_mode: MaintenanceMode::default(),
            display_settings: DisplaySettings::default(),
        }
    }
}

/// One immutable configuration version. Superseded versions are never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationVersion {
    pub version: ConfigVersion,
    pub snapshot: ConfigSnapshot,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

// ─── Change events ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeType {
    ModuleToggle,
    BulkModuleUpdate,
    MaintenanceToggle,
}

impl ChangeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ModuleToggle => "moduleToggle",
            Self::BulkModuleUpdate => "bulkModuleUpdate",
            Self::MaintenanceToggle => "maintenanceToggle",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-module before/after state in a bulk update. `None` means absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDelta {
    pub module: String,
    pub enabled_before: Option<bool>,
    pub enabled_after: Option<bool>,
}

/// Structured diff attached to a version transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ChangeDetails {
    ModuleToggle {
        module: String,
        previous_enabled: bool,
        enabled: bool,
    },
    BulkModuleUpdate {
        changes: Vec<ModuleDelta>,
    },
    MaintenanceToggle {
        previous_enabled: bool,
        enabled: bool,
        message: Option<String>,
        eta: Option<String>,
    },
}

impl ChangeDetails {
    pub fn change_type(&self) -> ChangeType {
        match self {
            Self::ModuleToggle { .. } => ChangeType::ModuleToggle,
            Self::BulkModuleUpdate { .. } => ChangeType::BulkModuleUpdate,
            Self::MaintenanceToggle { .. } => ChangeType::MaintenanceToggle,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigChangeEvent {
    pub from_version: ConfigVersion,
    pub to_version: ConfigVersion,
    pub change_type: ChangeType,
    pub change_details: ChangeDetails,
    /// Advisory urgency for client-side presentation. Never affects delivery.
    pub immediate: bool,
    pub reason: String,
    pub actor: String,
    pub at: DateTime<Utc>,
}

// ─── Stats ────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub total_active_sessions: usize,
    pub by_client_type: BTreeMap<ClientType, usize>,
    pub current_pages: BTreeMap<String, usize>,
    pub avg_session_duration_minutes: f64,
    pub unique_source_addresses: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSessionView {
    pub client_id: String,
    pub client_type: ClientType,
    pub current_page: String,
    pub duration_minutes: i64,
    pub source_address: Option<String>,
}
