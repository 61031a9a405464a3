//! Stable per-instance client id.
//!
//! A display instance keeps its id across reloads by persisting it in a
//! store scoped to that instance; a new instance (fresh store) gets a new id.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fleetsync_core::FleetError;
use fleetsync_core::types::ClientType;

pub trait ClientIdStore: Send + Sync {
    fn load(&self) -> Result<Option<String>, FleetError>;
    fn save(&self, client_id: &str) -> Result<(), FleetError>;
}

/// Id lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryClientIdStore {
    id: Mutex<Option<String>>,
}

impl ClientIdStore for MemoryClientIdStore {
    fn load(&self) -> Result<Option<String>, FleetError> {
        Ok(self.id.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save(&self, client_id: &str) -> Result<(), FleetError> {
        *self.id.lock().unwrap_or_else(|e| e.into_inner()) = Some(client_id.to_owned());
        Ok(())
    }
}

/// Id persisted in a single file, one file per display instance.
#[derive(Debug, Clone)]
pub struct FileClientIdStore {
    path: PathBuf,
}

impl FileClientIdStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ClientIdStore for FileClientIdStore {
    fn load(&self) -> Result<Option<String>, FleetError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => {
                let id = raw.trim();
                Ok((!id.is_empty()).then(|| id.to_owned()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FleetError::Storage(format!("{}: {e}", self.path.display()))),
        }
    }

    fn save(&self, client_id: &str) -> Result<(), FleetError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| FleetError::Storage(format!("{}: {e}", dir.display())))?;
        }
        std::fs::write(&self.path, client_id)
            .map_err(|e| FleetError::Storage(format!("{}: {e}", self.path.display())))
    }
}

/// Load the stored id, or mint `<type>-<uuid>` and store it.
pub fn obtain_client_id(
    store: &dyn ClientIdStore,
    client_type: ClientType,
) -> Result<String, FleetError> {
    if let Some(id) = store.load()? {
        return Ok(id);
    }
    let id = format!("{client_type}-{}", uuid::Uuid::new_v4());
    store.save(&id)?;
    tracing::debug!(client_id = %id, "generated new client id");
    Ok(id)
}
