//! Initial configuration snapshot loaded at daemon start.

use std::path::Path;

use anyhow::Context;
use fleetsync_core::types::ConfigSnapshot;

/// Read a seed snapshot, or fall back to the built-in default module set.
pub fn load_seed(path: Option<&Path>) -> anyhow::Result<ConfigSnapshot> {
    let Some(path) = path else {
        tracing::info!("no seed file, using default configuration");
        return Ok(ConfigSnapshot::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read seed file {}", path.display()))?;
    let snapshot: ConfigSnapshot = serde_json::from_str(&raw)
        .with_context(|| format!("invalid seed file {}", path.display()))?;
    tracing::info!(path = %path.display(), modules = snapshot.modules.len(), "loaded seed configuration");
    Ok(snapshot)
}
