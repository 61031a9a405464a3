//! SyncTransport trait: the display's view of the server. Enables mock
//! injection for testing.

use std::future::Future;

use fleetsync_core::FleetError;
use fleetsync_core::protocol::{HeartbeatRequest, HeartbeatResponse, PublicConfig};

pub trait SyncTransport: Send + Sync + 'static {
    fn heartbeat(
        &self,
        req: HeartbeatRequest,
    ) -> impl Future<Output = Result<HeartbeatResponse, FleetError>> + Send;

    /// Not-found is reported as success by the server.
    fn end_session(&self, client_id: &str) -> impl Future<Output = Result<(), FleetError>> + Send;

    /// Unauthenticated maintenance-mode read.
    fn public_config(&self) -> impl Future<Output = Result<PublicConfig, FleetError>> + Send;
}
