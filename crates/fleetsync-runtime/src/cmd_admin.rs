//! Admin subcommands: thin JSON-RPC calls that print the result as JSON.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::Serialize;

use fleetsync_core::protocol::{
    AdminAuth, BulkModuleUpdateRequest, MaintenanceToggleRequest, ModuleToggleRequest, methods,
};
use fleetsync_core::types::ModuleSettings;

use crate::cli::{MaintenanceOpts, ModuleOpts, ModulesOpts};
use crate::client::call;

pub async fn cmd_stats(server: &str, auth: AdminAuth) -> anyhow::Result<()> {
    print_call(server, methods::SESSIONS_STATS, &auth).await
}

pub async fn cmd_active(server: &str, auth: AdminAuth) -> anyhow::Result<()> {
    print_call(server, methods::SESSIONS_ACTIVE, &auth).await
}

pub async fn cmd_config(server: &str, auth: AdminAuth) -> anyhow::Result<()> {
    print_call(server, methods::ADMIN_CONFIG, &auth).await
}

pub async fn cmd_module(server: &str, auth: AdminAuth, opts: ModuleOpts) -> anyhow::Result<()> {
    let req = ModuleToggleRequest {
        auth,
        module_key: opts.key,
        enabled: opts.enable && !opts.disable,
        reason: opts.reason,
    };
    print_call(server, methods::ADMIN_MODULE_TOGGLE, &req).await
}

pub async fn cmd_modules(server: &str, auth: AdminAuth, opts: ModulesOpts) -> anyhow::Result<()> {
    let req = BulkModuleUpdateRequest {
        auth,
        modules: read_modules(&opts.file)?,
        reason: opts.reason,
    };
    print_call(server, methods::ADMIN_MODULES_BULK, &req).await
}

pub async fn cmd_maintenance(
    server: &str,
    auth: AdminAuth,
    opts: MaintenanceOpts,
) -> anyhow::Result<()> {
    let req = MaintenanceToggleRequest {
        auth,
        enabled: opts.on && !opts.off,
        message: opts.message,
        eta: opts.eta,
        reason: opts.reason,
    };
    print_call(server, methods::ADMIN_MAINTENANCE, &req).await
}

async fn print_call<P: Serialize + Sync>(server: &str, method: &str, params: &P) -> anyhow::Result<()> {
    let result: serde_json::Value = call(server, method, params)
        .await
        .with_context(|| format!("{method} failed"))?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn read_modules(path: &Path) -> anyhow::Result<BTreeMap<String, ModuleSettings>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid module map in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_map_file_is_parsed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("modules.json");
        std::fs::write(
            &path,
            r#"{"news": {"enabled": false, "label": "News"}, "vehicles": {"enabled": true}}"#,
        )
        .expect("write");

        let modules = read_modules(&path).expect("parse");
        assert_eq!(modules.len(), 2);
        assert!(!modules["news"].enabled);
        assert_eq!(modules["news"].label, "News");
        assert!(modules["vehicles"].description.is_empty());
    }

    #[test]
    fn module_map_rejects_non_object() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("modules.json");
        std::fs::write(&path, "[1, 2]").expect("write");
        assert!(read_modules(&path).is_err());
    }
}
