//! `fleetsync kiosk`: headless display agent.
//!
//! Runs the heartbeat loop and the maintenance gate against the daemon and
//! logs what a real display would render: applied configuration versions and
//! gate transitions.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use fleetsync_agent::{
    AgentSettings, ClientIdStore, ConfigUpdateNotice, FileClientIdStore, HeartbeatAgent,
    MaintenanceGate, MemoryClientIdStore, obtain_client_id,
};
use fleetsync_core::types::ClientMetadata;

use crate::cli::KioskOpts;
use crate::client::TcpTransport;

/// Upper bound on waiting for the end-session call at exit.
const EXIT_GRACE: Duration = Duration::from_secs(3);

pub async fn cmd_kiosk(server: &str, opts: KioskOpts) -> anyhow::Result<()> {
    let store: Box<dyn ClientIdStore> = match &opts.id_file {
        Some(path) => Box::new(FileClientIdStore::new(path)),
        None => Box::new(MemoryClientIdStore::default()),
    };
    let client_id = obtain_client_id(store.as_ref(), opts.client_type)?;
    tracing::info!(client_id = %client_id, server, "kiosk agent starting");

    let transport = Arc::new(TcpTransport::new(server));
    let settings = settings_from(&opts);

    let agent = HeartbeatAgent::new(Arc::clone(&transport), client_id, settings, log_update);
    let handle = agent.spawn();

    let gate = MaintenanceGate::new(Arc::clone(&transport))
        .with_interval(Duration::from_secs(opts.maintenance_interval_secs.max(1)));
    let mut gate_rx = gate.subscribe();
    let gate_cancel = CancellationToken::new();
    let gate_task = tokio::spawn(gate.run(gate_cancel.clone()));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received ctrl-c, shutting down");
                break;
            }
            changed = gate_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = gate_rx.borrow_and_update().clone();
                if state.allows_rendering() {
                    println!("content: rendering");
                } else {
                    println!("content: maintenance screen ({state:?})");
                }
            }
        }
    }

    gate_cancel.cancel();
    let end = handle.shutdown();
    let _ = tokio::time::timeout(EXIT_GRACE, end).await;
    let _ = gate_task.await;
    Ok(())
}

fn settings_from(opts: &KioskOpts) -> AgentSettings {
    AgentSettings {
        client_type: opts.client_type,
        current_page: opts.page.clone(),
        metadata: ClientMetadata {
            user_agent: Some(format!("fleetsync/{}", env!("CARGO_PKG_VERSION"))),
            screen_resolution: opts.screen_resolution.clone(),
        },
        interval: Duration::from_secs(opts.interval_secs.max(1)),
        ..AgentSettings::default()
    }
}

fn log_update(notice: ConfigUpdateNotice) {
    let enabled: Vec<&str> = notice
        .config
        .modules
        .iter()
        .filter(|(_, m)| m.enabled)
        .map(|(key, _)| key.as_str())
        .collect();
    if notice.immediate {
        println!(
            "config v{} applied now: {}",
            notice.version,
            notice.reason.as_deref().unwrap_or("update")
        );
    } else {
        println!("config v{} applied", notice.version);
    }
    println!("modules: {}", enabled.join(", "));
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetsync_core::types::ClientType;

    #[test]
    fn settings_follow_options() {
        let opts = KioskOpts {
            client_type: ClientType::Kiosk,
            page: "/vehicles".into(),
            id_file: None,
            interval_secs: 0,
            maintenance_interval_secs: 10,
            screen_resolution: Some("1920x1080".into()),
        };
        let settings = settings_from(&opts);
        assert_eq!(settings.current_page, "/vehicles");
        assert_eq!(settings.interval, Duration::from_secs(1), "zero is clamped");
        assert_eq!(settings.metadata.screen_resolution.as_deref(), Some("1920x1080"));
        assert_eq!(settings.end_session_timeout, Duration::from_secs(2));
    }
}
