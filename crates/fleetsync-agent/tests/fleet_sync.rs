//! Agent and gate driven against the real protocol handler in-process.

use std::sync::{Arc, Mutex};

use chrono::{TimeDelta, TimeZone, Utc};
use fleetsync_agent::{
    AgentSettings, ConfigUpdateNotice, GateState, HeartbeatAgent, HeartbeatOutcome,
    MaintenanceGate, MemoryClientIdStore, SyncTransport, obtain_client_id,
};
use fleetsync_config::ConfigStore;
use fleetsync_core::FleetError;
use fleetsync_core::protocol::{
    AdminAuth, HeartbeatRequest, HeartbeatResponse, MaintenanceToggleRequest, ModuleToggleRequest,
    PublicConfig,
};
use fleetsync_core::types::{ChangeType, ClientType, ConfigSnapshot};
use fleetsync_registry::SessionRegistry;
use fleetsync_sync::{ManualClock, SyncHandler};

const TOKEN: &str = "s3cret";

/// Transport that calls the handler directly.
struct LocalTransport {
    handler: SyncHandler,
}

impl SyncTransport for LocalTransport {
    async fn heartbeat(&self, req: HeartbeatRequest) -> Result<HeartbeatResponse, FleetError> {
        self.handler.heartbeat(req, Some("127.0.0.1".into())).await
    }

    async fn end_session(&self, client_id: &str) -> Result<(), FleetError> {
        self.handler.end_session(client_id).await;
        Ok(())
    }

    async fn public_config(&self) -> Result<PublicConfig, FleetError> {
        Ok(self.handler.public_config().await)
    }
}

fn setup(version: u64) -> (SyncHandler, Arc<ManualClock>, Arc<LocalTransport>) {
    let start = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).single().expect("ts");
    let clock = Arc::new(ManualClock::new(start));
    let handler = SyncHandler::with_clock(
        SessionRegistry::new(),
        ConfigStore::with_version(ConfigSnapshot::default(), version),
        TOKEN,
        clock.clone(),
    );
    let transport = Arc::new(LocalTransport {
        handler: handler.clone(),
    });
    (handler, clock, transport)
}

fn recording_agent(
    transport: Arc<LocalTransport>,
    client_id: &str,
) -> (HeartbeatAgent<LocalTransport>, Arc<Mutex<Vec<ConfigUpdateNotice>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let agent = HeartbeatAgent::new(transport, client_id, AgentSettings::default(), move |n| {
        sink.lock().expect("lock").push(n);
    });
    (agent, log)
}

#[tokio::test]
async fn fresh_kiosk_pulls_seeded_config_then_settles() {
    let (_, _, transport) = setup(1);
    let client_id = obtain_client_id(&MemoryClientIdStore::default(), ClientType::Kiosk).expect("id");
    let (mut agent, log) = recording_agent(transport, &client_id);

    assert_eq!(agent.tick().await, HeartbeatOutcome::Updated(1));
    assert_eq!(agent.tick().await, HeartbeatOutcome::UpToDate);
    assert_eq!(log.lock().expect("lock").len(), 1);
    assert_eq!(agent.last_counts().expect("counts").of(ClientType::Kiosk), 1);
}

#[tokio::test]
async fn module_toggle_flows_to_kiosk() {
    let (handler, clock, transport) = setup(5);
    let (agent, log) = recording_agent(transport, "K1");
    let mut agent = agent.with_last_config_version(5);

    assert_eq!(agent.tick().await, HeartbeatOutcome::UpToDate);
    clock.advance(TimeDelta::seconds(30));
    assert_eq!(agent.tick().await, HeartbeatOutcome::UpToDate);

    clock.advance(TimeDelta::seconds(15));
    let resp = handler
        .toggle_module(ModuleToggleRequest {
            auth: AdminAuth::new(TOKEN),
            module_key: "news".into(),
            enabled: false,
            reason: None,
        })
        .await
        .expect("toggle");
    assert_eq!(resp.notified_sessions, 1);

    clock.advance(TimeDelta::seconds(15));
    assert_eq!(agent.tick().await, HeartbeatOutcome::Updated(6));
    {
        let notices = log.lock().expect("lock");
        assert_eq!(notices[0].change_type, Some(ChangeType::ModuleToggle));
        assert!(!notices[0].config.modules["news"].enabled);
    }

    clock.advance(TimeDelta::seconds(30));
    assert_eq!(agent.tick().await, HeartbeatOutcome::UpToDate);
}

#[tokio::test]
async fn maintenance_reaches_gate_and_heartbeat() {
    let (handler, _, transport) = setup(6);
    let gate = MaintenanceGate::new(Arc::clone(&transport));
    let (agent, log) = recording_agent(Arc::clone(&transport), "K1");
    let mut agent = agent.with_last_config_version(6);

    // the gate works before the display has registered
    assert_eq!(gate.poll_once().await, GateState::Open);

    handler
        .toggle_maintenance(MaintenanceToggleRequest {
            auth: AdminAuth::new(TOKEN),
            enabled: true,
            message: Some("upgrade in progress".into()),
            eta: None,
            reason: None,
        })
        .await
        .expect("toggle");

    assert_eq!(
        gate.poll_once().await,
        GateState::Blocked {
            message: Some("upgrade in progress".into()),
            eta: None,
        }
    );

    assert_eq!(agent.tick().await, HeartbeatOutcome::Updated(7));
    let notices = log.lock().expect("lock");
    assert!(notices[0].immediate);
    assert_eq!(
        notices[0].config.maintenance_mode.message.as_deref(),
        Some("upgrade in progress")
    );
}

#[tokio::test]
async fn shutdown_ends_session_on_server() {
    let (handler, _, transport) = setup(1);
    let (agent, _) = recording_agent(transport, "K1");
    let handle = agent.spawn();

    // let the immediate heartbeat land
    for _ in 0..50 {
        if handler.registry().lock().await.get("K1").is_some() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(handler.registry().lock().await.get("K1").is_some());

    handle.shutdown().await.expect("join");
    assert!(handler.registry().lock().await.get("K1").is_none());

    // a duplicate end from another teardown path is harmless
    assert!(handler.end_session("K1").await.ok);
}
