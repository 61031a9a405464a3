//! fleetsync-config: the single current, versioned fleet configuration and
//! its atomic mutations.

pub mod store;

pub use store::{ConfigStore, INITIAL_VERSION, epoch_version};
