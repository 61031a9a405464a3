//! fleetsync-agent: display-side heartbeat agent and maintenance gate.
//!
//! Both loops talk to the server through [`SyncTransport`], so displays can
//! run over the TCP client or, in tests, straight against a handler.

pub mod client_id;
pub mod heartbeat;
pub mod maintenance_gate;
pub mod transport;

pub use client_id::{ClientIdStore, FileClientIdStore, MemoryClientIdStore, obtain_client_id};
pub use heartbeat::{
    AgentHandle, AgentSettings, ConfigUpdateNotice, HeartbeatAgent, HeartbeatOutcome,
    fire_end_session,
};
pub use maintenance_gate::{GateState, MaintenanceGate};
pub use transport::SyncTransport;
