//! fleetsync-sync: the heartbeat/admin protocol handler over the session
//! registry and configuration store, plus the staleness sweeper.

pub mod clock;
pub mod handler;
pub mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use handler::SyncHandler;
pub use sweeper::{DEFAULT_SWEEP_INTERVAL, run_sweeper, sweep_once};
