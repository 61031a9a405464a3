//! fleetsync-core: shared data model, wire protocol and error taxonomy for
//! kiosk fleet presence tracking and configuration sync.

pub mod error;
pub mod protocol;
pub mod types;

pub use error::FleetError;
