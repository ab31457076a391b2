//! Registry and sandbox abstraction
//!
//! Traits for the two collaborators of the cache engine. Implemented by
//! the podman and remote backends (and an in-memory fake under test).

use crate::error::{StratumError, StratumResult};
use crate::snapshot::{
    ExecOutput, InstanceStatus, Metadata, MetadataUpdate, ResourceSpec, Snapshot,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Options for syncing local files into an instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// Remove remote files that do not exist locally
    pub delete: bool,
    /// Patterns excluded from the transfer
    pub exclude: Vec<String>,
}

/// Lookup and lifecycle of immutable snapshot records
#[async_trait]
pub trait Registry: Send + Sync {
    /// All snapshots whose digest equals `digest` (possibly several)
    async fn list_snapshots_by_digest(&self, digest: &str) -> StratumResult<Vec<Snapshot>>;

    /// All snapshots known to the registry
    async fn list_snapshots(&self) -> StratumResult<Vec<Snapshot>>;

    /// Fetch a snapshot by id
    async fn get_snapshot(&self, id: &str) -> StratumResult<Snapshot>;

    /// Create a snapshot from a base image
    async fn create_snapshot_from_image(
        &self,
        image: &str,
        spec: &ResourceSpec,
        metadata: &Metadata,
        digest: Option<&str>,
    ) -> StratumResult<Snapshot>;

    /// Delete a snapshot
    async fn delete_snapshot(&self, id: &str) -> StratumResult<()>;

    /// Update a snapshot's metadata, returning the updated record
    async fn set_snapshot_metadata(
        &self,
        id: &str,
        update: &MetadataUpdate,
    ) -> StratumResult<Snapshot>;

    /// Human-readable backend name
    fn backend_name(&self) -> &'static str;
}

/// Starts instances from snapshots
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Start a new instance from a snapshot. The caller owns it and must stop it.
    async fn start_from_snapshot(&self, snapshot_id: &str) -> StratumResult<Box<dyn Instance>>;
}

/// Handle to a running instance
#[async_trait]
pub trait Instance: Send + Sync {
    /// Instance id
    fn id(&self) -> &str;

    /// Current status as reported by the backend
    async fn status(&self) -> StratumResult<InstanceStatus>;

    /// Poll `status` every `poll` until the instance is ready.
    ///
    /// Fails with `ReadyTimeout` once `timeout` elapses and with
    /// `InstanceFailed` as soon as the instance reports an error status.
    async fn wait_until_ready(&self, timeout: Duration, poll: Duration) -> StratumResult<()> {
        let poll_loop = async {
            loop {
                match self.status().await? {
                    InstanceStatus::Ready => return Ok(()),
                    InstanceStatus::Error => {
                        return Err(StratumError::InstanceFailed {
                            instance: self.id().to_string(),
                            status: InstanceStatus::Error.to_string(),
                        })
                    }
                    status => debug!("Instance {} is {}, waiting", self.id(), status),
                }
                tokio::time::sleep(poll).await;
            }
        };

        match tokio::time::timeout(timeout, poll_loop).await {
            Ok(result) => result,
            Err(_) => Err(StratumError::ReadyTimeout {
                instance: self.id().to_string(),
                timeout_secs: timeout.as_secs(),
            }),
        }
    }

    /// Run a shell command. A non-zero exit code is not an error here.
    async fn execute(&self, command: &str, pty: bool) -> StratumResult<ExecOutput>;

    /// Capture the instance state as a new snapshot
    async fn capture_snapshot(
        &self,
        digest: Option<&str>,
        metadata: Option<&Metadata>,
    ) -> StratumResult<Snapshot>;

    /// Stop and discard the instance
    async fn stop(&self) -> StratumResult<()>;

    /// Copy `local` into the instance at `remote`
    async fn sync_files(
        &self,
        local: &Path,
        remote: &str,
        options: &SyncOptions,
    ) -> StratumResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::provider::fake::FakeBackend;

    #[tokio::test]
    async fn wait_until_ready_returns_when_ready() {
        let backend = FakeBackend::new();
        let base = backend.seed_snapshot("snap_1", None);
        let instance = backend.start_from_snapshot(&base.id).await.unwrap();

        instance
            .wait_until_ready(Duration::from_secs(1), Duration::from_millis(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn wait_until_ready_times_out() {
        let backend = FakeBackend::new();
        backend.set_instance_status(InstanceStatus::Pending);
        let base = backend.seed_snapshot("snap_1", None);
        let instance = backend.start_from_snapshot(&base.id).await.unwrap();

        let err = instance
            .wait_until_ready(Duration::from_millis(30), Duration::from_millis(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn wait_until_ready_fails_on_error_status() {
        let backend = FakeBackend::new();
        backend.set_instance_status(InstanceStatus::Error);
        let base = backend.seed_snapshot("snap_1", None);
        let instance = backend.start_from_snapshot(&base.id).await.unwrap();

        let err = instance
            .wait_until_ready(Duration::from_secs(1), Duration::from_millis(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Sandbox);
    }
}
