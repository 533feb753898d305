use crate::config::{StateBackend, StateConfig};
use crate::error::{AppError, Result};
use crate::state::{FindingStore, InMemoryStore, SledStore, SnapshotStore};
use std::sync::Arc;

/// Handles to the two storage collaborators. Both backends implement both
/// traits, so the handles usually point at the same instance.
#[derive(Clone)]
pub struct StoreHandles {
    pub findings: Arc<dyn FindingStore>,
    pub snapshots: Arc<dyn SnapshotStore>,
}

/// Create finding and snapshot stores based on configuration
pub fn create_store(config: &StateConfig) -> Result<StoreHandles> {
    match config.backend {
        StateBackend::Sled => {
            let path = config.path.as_ref().ok_or_else(|| {
                AppError::Configuration("Sled backend requires 'path' configuration".to_string())
            })?;

            tracing::info!(path = ?path, "Initializing Sled storage backend");

            let store = SledStore::new(path)?;
            Ok(StoreHandles {
                findings: Arc::new(store.clone()),
                snapshots: Arc::new(store),
            })
        }

        StateBackend::Memory => {
            tracing::info!("Initializing in-memory storage backend");
            let store = InMemoryStore::new();
            Ok(StoreHandles {
                findings: Arc::new(store.clone()),
                snapshots: Arc::new(store),
            })
        }
    }
}
