//! In-memory registry and sandbox for unit tests
//!
//! Records every backend call in order so tests can assert on the
//! lookup/start/ready/effect/capture/stop sequence.

use crate::error::{StratumError, StratumResult};
use crate::provider::backend::{Instance, Registry, Sandbox, SyncOptions};
use crate::snapshot::{
    ExecOutput, InstanceStatus, Metadata, MetadataUpdate, ResourceSpec, Snapshot, SnapshotStatus,
};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
struct FakeState {
    snapshots: Vec<Snapshot>,
    events: Vec<String>,
    next_id: u32,
    instance_status: InstanceStatus,
    /// Commands containing any of these substrings exit with code 1
    failing_commands: Vec<String>,
    fail_start: bool,
    fail_capture: bool,
    fail_stop: bool,
    synced: Vec<(PathBuf, String)>,
}

/// Shared fake backend. Clones share state.
#[derive(Debug, Clone)]
pub(crate) struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                snapshots: Vec::new(),
                events: Vec::new(),
                next_id: 1,
                instance_status: InstanceStatus::Ready,
                failing_commands: Vec::new(),
                fail_start: false,
                fail_capture: false,
                fail_stop: false,
                synced: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Insert a ready snapshot directly into the registry
    pub fn seed_snapshot(&self, id: &str, digest: Option<&str>) -> Snapshot {
        let snapshot = Snapshot {
            id: id.to_string(),
            created_at: Utc::now(),
            status: SnapshotStatus::Ready,
            spec: ResourceSpec::default(),
            image_id: "debian:12".to_string(),
            digest: digest.map(str::to_string),
            metadata: Metadata::new(),
        };
        self.lock().snapshots.push(snapshot.clone());
        snapshot
    }

    pub fn set_instance_status(&self, status: InstanceStatus) {
        self.lock().instance_status = status;
    }

    pub fn fail_command(&self, pattern: &str) {
        self.lock().failing_commands.push(pattern.to_string());
    }

    pub fn fail_start(&self) {
        self.lock().fail_start = true;
    }

    pub fn fail_capture(&self) {
        self.lock().fail_capture = true;
    }

    pub fn fail_stop(&self) {
        self.lock().fail_stop = true;
    }

    /// All recorded events
    pub fn events(&self) -> Vec<String> {
        self.lock().events.clone()
    }

    /// Recorded events whose name (the part before ':') is `name`
    pub fn count(&self, name: &str) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|e| e.split(':').next() == Some(name))
            .count()
    }

    /// Event names in order, without their arguments
    pub fn event_names(&self) -> Vec<String> {
        self.lock()
            .events
            .iter()
            .map(|e| e.split(':').next().unwrap_or_default().to_string())
            .collect()
    }

    pub fn synced(&self) -> Vec<(PathBuf, String)> {
        self.lock().synced.clone()
    }

    pub fn snapshot_count(&self) -> usize {
        self.lock().snapshots.len()
    }

    fn record(&self, event: String) {
        self.lock().events.push(event);
    }

    fn next_id(&self, prefix: &str) -> String {
        let mut state = self.lock();
        let id = format!("{}_{}", prefix, state.next_id);
        state.next_id += 1;
        id
    }
}

#[async_trait]
impl Registry for FakeBackend {
    async fn list_snapshots_by_digest(&self, digest: &str) -> StratumResult<Vec<Snapshot>> {
        self.record(format!("lookup:{}", digest));
        Ok(self
            .lock()
            .snapshots
            .iter()
            .filter(|s| s.digest.as_deref() == Some(digest))
            .cloned()
            .collect())
    }

    async fn list_snapshots(&self) -> StratumResult<Vec<Snapshot>> {
        Ok(self.lock().snapshots.clone())
    }

    async fn get_snapshot(&self, id: &str) -> StratumResult<Snapshot> {
        self.lock()
            .snapshots
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| StratumError::SnapshotNotFound(id.to_string()))
    }

    async fn create_snapshot_from_image(
        &self,
        image: &str,
        spec: &ResourceSpec,
        metadata: &Metadata,
        digest: Option<&str>,
    ) -> StratumResult<Snapshot> {
        let id = self.next_id("snapshot");
        self.record(format!("create:{}", image));
        let snapshot = Snapshot {
            id,
            created_at: Utc::now(),
            status: SnapshotStatus::Ready,
            spec: *spec,
            image_id: image.to_string(),
            digest: digest.map(str::to_string),
            metadata: metadata.clone(),
        };
        self.lock().snapshots.push(snapshot.clone());
        Ok(snapshot)
    }

    async fn delete_snapshot(&self, id: &str) -> StratumResult<()> {
        let mut state = self.lock();
        let before = state.snapshots.len();
        state.snapshots.retain(|s| s.id != id);
        if state.snapshots.len() == before {
            return Err(StratumError::SnapshotNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn set_snapshot_metadata(
        &self,
        id: &str,
        update: &MetadataUpdate,
    ) -> StratumResult<Snapshot> {
        let mut state = self.lock();
        let snapshot = state
            .snapshots
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| StratumError::SnapshotNotFound(id.to_string()))?;
        snapshot.metadata.apply(update);
        Ok(snapshot.clone())
    }

    fn backend_name(&self) -> &'static str {
        "fake"
    }
}

#[async_trait]
impl Sandbox for FakeBackend {
    async fn start_from_snapshot(&self, snapshot_id: &str) -> StratumResult<Box<dyn Instance>> {
        self.record(format!("start:{}", snapshot_id));
        if self.lock().fail_start {
            return Err(StratumError::transport("start instance", "connection refused"));
        }
        let base = self.get_snapshot(snapshot_id).await?;
        Ok(Box::new(FakeInstance {
            id: self.next_id("instance"),
            base,
            backend: self.clone(),
        }))
    }
}

/// Instance handle produced by `FakeBackend`
pub(crate) struct FakeInstance {
    id: String,
    base: Snapshot,
    backend: FakeBackend,
}

#[async_trait]
impl Instance for FakeInstance {
    fn id(&self) -> &str {
        &self.id
    }

    async fn status(&self) -> StratumResult<InstanceStatus> {
        self.backend.record(format!("status:{}", self.id));
        Ok(self.backend.lock().instance_status)
    }

    async fn execute(&self, command: &str, pty: bool) -> StratumResult<ExecOutput> {
        self.backend.record(format!("exec:{}:{}", pty, command));
        let fails = self
            .backend
            .lock()
            .failing_commands
            .iter()
            .any(|p| command.contains(p.as_str()));
        let exit_code = if fails { 1 } else { 0 };
        Ok(ExecOutput {
            exit_code: Some(exit_code),
            stdout: format!("ran {}\n", command),
            stderr: String::new(),
            output: vec![format!("ran {}", command)],
        })
    }

    async fn capture_snapshot(
        &self,
        digest: Option<&str>,
        metadata: Option<&Metadata>,
    ) -> StratumResult<Snapshot> {
        self.backend
            .record(format!("capture:{}", digest.unwrap_or_default()));
        if self.backend.lock().fail_capture {
            return Err(StratumError::transport("capture snapshot", "disk full"));
        }
        let snapshot = Snapshot {
            id: self.backend.next_id("snapshot"),
            created_at: Utc::now(),
            status: SnapshotStatus::Ready,
            spec: self.base.spec,
            image_id: self.base.image_id.clone(),
            digest: digest.map(str::to_string),
            metadata: metadata.cloned().unwrap_or_default(),
        };
        self.backend.lock().snapshots.push(snapshot.clone());
        Ok(snapshot)
    }

    async fn stop(&self) -> StratumResult<()> {
        self.backend.record(format!("stop:{}", self.id));
        if self.backend.lock().fail_stop {
            return Err(StratumError::transport("stop instance", "gateway timeout"));
        }
        Ok(())
    }

    async fn sync_files(
        &self,
        local: &Path,
        remote: &str,
        _options: &SyncOptions,
    ) -> StratumResult<()> {
        self.backend
            .record(format!("sync:{}:{}", local.display(), remote));
        self.backend
            .lock()
            .synced
            .push((local.to_path_buf(), remote.to_string()));
        Ok(())
    }
}
