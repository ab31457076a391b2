//! Backend factory
//!
//! Picks the registry and sandbox implementation named in the config.

use crate::config::{BackendKind, Config, ConfigManager};
use crate::error::StratumResult;
use crate::provider::backend::{Registry, Sandbox};
use crate::provider::podman::PodmanBackend;
use crate::provider::remote::RemoteClient;
use crate::provider::store::SnapshotStore;
use std::sync::Arc;
use tracing::debug;

/// A registry and sandbox pair served by the same backend
#[derive(Clone)]
pub struct Backend {
    pub registry: Arc<dyn Registry>,
    pub sandbox: Arc<dyn Sandbox>,
}

impl Backend {
    /// Use one value as both registry and sandbox
    pub fn from_shared<B>(backend: B) -> Self
    where
        B: Registry + Sandbox + 'static,
    {
        let shared = Arc::new(backend);
        Self {
            registry: shared.clone(),
            sandbox: shared,
        }
    }
}

/// Create the backend selected by `config.backend.kind`
///
/// # Errors
/// * `ApiKeyMissing` - remote backend without an API key
pub fn create_backend(config: &Config) -> StratumResult<Backend> {
    debug!("Creating {} backend", config.backend.kind);

    match config.backend.kind {
        BackendKind::Podman => {
            let store = SnapshotStore::new(ConfigManager::snapshots_dir(config));
            Ok(Backend::from_shared(PodmanBackend::new(store)))
        }
        BackendKind::Remote => Ok(Backend::from_shared(RemoteClient::from_config(
            &config.remote,
        )?)),
    }
}
