//! fleetsync-registry: in-memory registry of live display sessions with
//! staleness expiry and aggregate stats.

pub mod registry;

pub use registry::{DEFAULT_STALE_THRESHOLD_SECS, SessionRegistry, Sighting};
