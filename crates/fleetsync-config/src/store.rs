//! Versioned configuration store.
//!
//! Holds exactly one current [`ConfigurationVersion`] plus the change event
//! that produced it. Every mutation clones the current snapshot, edits the
//! clone, and swaps in a new version numbered `current + 1`; the superseded
//! value is dropped untouched. Callers serialize access (the store is only
//! mutated through `&mut self`), so readers detect staleness with a plain
//! `last_seen < current` comparison.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use fleetsync_core::FleetError;
use fleetsync_core::types::{
    ChangeDetails, ConfigChangeEvent, ConfigSnapshot, ConfigVersion, ConfigurationVersion,
    MaintenanceMode, ModuleDelta, ModuleSettings,
};

/// Version assigned to a freshly seeded store.
pub const INITIAL_VERSION: ConfigVersion = 1;

const SEED_ACTOR: &str = "system";

/// Starting version for a store created at `now`: Unix time in milliseconds.
///
/// Seeding a restarted server this way numbers its versions above those of
/// any earlier run that averaged under one mutation per millisecond, so a
/// version is not handed out twice across restarts.
pub fn epoch_version(now: DateTime<Utc>) -> ConfigVersion {
    u64::try_from(now.timestamp_millis())
        .unwrap_or(INITIAL_VERSION)
        .max(INITIAL_VERSION)
}

#[derive(Debug)]
pub struct ConfigStore {
    current: ConfigurationVersion,
    last_change: Option<ConfigChangeEvent>,
}

impl ConfigStore {
    pub fn new(snapshot: ConfigSnapshot) -> Self {
        Self::with_version(snapshot, INITIAL_VERSION)
    }

    /// Seed the store at an explicit version (e.g. to continue numbering).
    pub fn with_version(snapshot: ConfigSnapshot, version: ConfigVersion) -> Self {
        Self {
            current: ConfigurationVersion {
                version,
                snapshot,
                updated_at: Utc::now(),
                updated_by: SEED_ACTOR.to_owned(),
            },
            last_change: None,
        }
    }

    pub fn current(&self) -> &ConfigurationVersion {
        &self.current
    }

    pub fn version(&self) -> ConfigVersion {
        self.current.version
    }

    /// The event that produced the current version, if any mutation happened.
    pub fn last_change(&self) -> Option<&ConfigChangeEvent> {
        self.last_change.as_ref()
    }

    pub fn maintenance_mode(&self) -> &MaintenanceMode {
        &self.current.snapshot.maintenance_mode
    }

    /// Flip one module's `enabled` flag.
    ///
    /// Unknown keys are rejected and leave the store untouched.
    pub fn apply_module_toggle(
        &mut self,
        module_key: &str,
        enabled: bool,
        actor: &str,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ConfigVersion, FleetError> {
        let mut snapshot = self.current.snapshot.clone();
        let module = snapshot
            .modules
            .get_mut(module_key)
            .ok_or_else(|| FleetError::UnknownModule(module_key.to_owned()))?;
        let previous_enabled = module.enabled;
        module.enabled = enabled;

        let reason = reason.unwrap_or_else(|| {
            format!(
                "module '{module_key}' {} by {actor}",
                if enabled { "enabled" } else { "disabled" }
            )
        });
        let details = ChangeDetails::ModuleToggle {
            module: module_key.to_owned(),
            previous_enabled,
            enabled,
        };
        self.commit(snapshot, details, false, reason, actor, now)
    }

    /// Replace the whole module map in one step: one version increment no
    /// matter how many keys changed.
    pub fn apply_bulk_module_update(
        &mut self,
        modules: BTreeMap<String, ModuleSettings>,
        actor: &str,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ConfigVersion, FleetError> {
        let changes = diff_modules(&self.current.snapshot.modules, &modules);
        let mut snapshot = self.current.snapshot.clone();
        snapshot.modules = modules;

        let reason =
            reason.unwrap_or_else(|| format!("{} module(s) updated by {actor}", changes.len()));
        let details = ChangeDetails::BulkModuleUpdate { changes };
        self.commit(snapshot, details, false, reason, actor, now)
    }

    /// Switch maintenance mode. Always flagged immediate.
    pub fn apply_maintenance_toggle(
        &mut self,
        enabled: bool,
        message: Option<String>,
        eta: Option<String>,
        actor: &str,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ConfigVersion, FleetError> {
        let mut snapshot = self.current.snapshot.clone();
        let previous_enabled = snapshot.maintenance_mode.enabled;
        snapshot.maintenance_mode = MaintenanceMode {
            enabled,
            message: message.clone(),
            show_eta: eta.is_some(),
            eta: eta.clone(),
        };

        let reason = reason.unwrap_or_else(|| {
            format!(
                "maintenance mode {} by {actor}",
                if enabled { "enabled" } else { "disabled" }
            )
        });
        let details = ChangeDetails::MaintenanceToggle {
            previous_enabled,
            enabled,
            message,
            eta,
        };
        self.commit(snapshot, details, true, reason, actor, now)
    }

    fn commit(
        &mut self,
        snapshot: ConfigSnapshot,
        details: ChangeDetails,
        immediate: bool,
        reason: String,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<ConfigVersion, FleetError> {
        let from_version = self.current.version;
        let to_version = from_version
            .checked_add(1)
            .ok_or(FleetError::VersionExhausted)?;

        self.current = ConfigurationVersion {
            version: to_version,
            snapshot,
            updated_at: now,
            updated_by: actor.to_owned(),
        };

        tracing::info!(
            from_version,
            to_version,
            change_type = %details.change_type(),
            immediate,
            actor,
            "configuration updated"
        );

        self.last_change = Some(ConfigChangeEvent {
            from_version,
            to_version,
            change_type: details.change_type(),
            change_details: details,
            immediate,
            reason,
            actor: actor.to_owned(),
            at: now,
        });

        Ok(to_version)
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(ConfigSnapshot::default())
    }
}

/// Per-module enabled-flag diff; unchanged modules are omitted.
fn diff_modules(
    before: &BTreeMap<String, ModuleSettings>,
    after: &BTreeMap<String, ModuleSettings>,
) -> Vec<ModuleDelta> {
    let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    keys.into_iter()
        .filter_map(|key| {
            let enabled_before = before.get(key).map(|m| m.enabled);
            let enabled_after = after.get(key).map(|m| m.enabled);
            (enabled_before != enabled_after).then(|| ModuleDelta {
                module: key.clone(),
                enabled_before,
                enabled_after,
            })
        })
        .collect()
}
