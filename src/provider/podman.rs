//! Podman snapshot backend
//!
//! Implements `Registry` and `Sandbox` with rootless Podman: snapshots are
//! committed images tracked by `SnapshotStore`, instances are long-running
//! containers that are committed on capture and removed on stop.

use crate::error::{StratumError, StratumResult};
use crate::provider::backend::{Instance, Registry, Sandbox, SyncOptions};
use crate::provider::store::{SnapshotRecord, SnapshotStore};
use crate::provider::{error_output_tail, stream_child_output};
use crate::snapshot::{
    ExecOutput, InstanceStatus, Metadata, MetadataUpdate, ResourceSpec, Snapshot, SnapshotStatus,
};
use async_trait::async_trait;
use chrono::Utc;
use std::io::ErrorKind as IoErrorKind;
use std::path::Path;
use std::process::{ExitStatus, Output, Stdio};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Labels attached to containers and committed images
pub mod labels {
    /// Snapshot a container was started from
    pub const SNAPSHOT: &str = "io.stratum.snapshot";
    /// Digest of a committed snapshot image
    pub const DIGEST: &str = "io.stratum.digest";
}

/// Repository used for committed snapshot images
const SNAPSHOT_REPOSITORY: &str = "localhost/stratum-snapshot";

fn new_snapshot_id() -> String {
    format!("snapshot_{}", &Uuid::new_v4().simple().to_string()[..12])
}

fn snapshot_image_tag(id: &str) -> String {
    format!("{}:{}", SNAPSHOT_REPOSITORY, id)
}

/// Map `podman inspect` container state to an instance status
fn parse_container_state(state: &str) -> InstanceStatus {
    match state.trim() {
        "running" => InstanceStatus::Ready,
        "paused" => InstanceStatus::Paused,
        "created" | "configured" | "initialized" => InstanceStatus::Pending,
        _ => InstanceStatus::Error,
    }
}

/// Arguments for starting an instance container from a snapshot record
fn run_args(name: &str, record: &SnapshotRecord) -> Vec<String> {
    let spec = &record.snapshot.spec;
    vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        name.to_string(),
        "--label".to_string(),
        format!("{}={}", labels::SNAPSHOT, record.snapshot.id),
        "--cpus".to_string(),
        spec.vcpus.to_string(),
        "--memory".to_string(),
        format!("{}m", spec.memory_mb),
        "--entrypoint".to_string(),
        "sleep".to_string(),
        record.runnable_image.clone(),
        "infinity".to_string(),
    ]
}

/// Execute a Podman command and return the output
async fn podman(args: &[&str]) -> StratumResult<Output> {
    debug!("Executing: podman {:?}", args);

    Command::new("podman")
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| {
            if e.kind() == IoErrorKind::NotFound {
                StratumError::PodmanNotFound
            } else {
                StratumError::command_failed(format!("podman {:?}", args), e)
            }
        })
}

/// Execute a Podman command, failing on non-zero exit. Returns trimmed stdout.
async fn podman_ok(args: &[&str]) -> StratumResult<String> {
    let output = podman(args).await?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(StratumError::command_exec(
            format!("podman {}", args.first().copied().unwrap_or_default()),
            stderr.trim(),
        ))
    }
}

/// Snapshot registry and sandbox backed by local Podman
#[derive(Debug, Clone)]
pub struct PodmanBackend {
    store: SnapshotStore,
}

impl PodmanBackend {
    /// Create a backend persisting snapshot records in `store`
    pub fn new(store: SnapshotStore) -> Self {
        Self { store }
    }

    /// Pull an image
    async fn pull(&self, image: &str) -> StratumResult<()> {
        info!("Pulling image: {}", image);
        podman_ok(&["pull", image]).await.map(|_| ())
    }

    /// Check if image exists locally
    async fn image_exists(&self, image: &str) -> StratumResult<bool> {
        let output = podman(&["image", "exists", image]).await?;
        Ok(output.status.success())
    }

    async fn load_record(&self, id: &str) -> StratumResult<SnapshotRecord> {
        self.store
            .load(id)
            .await?
            .ok_or_else(|| StratumError::SnapshotNotFound(id.to_string()))
    }
}

#[async_trait]
impl Registry for PodmanBackend {
    async fn list_snapshots_by_digest(&self, digest: &str) -> StratumResult<Vec<Snapshot>> {
        debug!("Looking up snapshots with digest {}", digest);
        Ok(self
            .store
            .find_by_digest(digest)
            .await?
            .into_iter()
            .map(|r| r.snapshot)
            .collect())
    }

    async fn list_snapshots(&self) -> StratumResult<Vec<Snapshot>> {
        Ok(self
            .store
            .list_all()
            .await?
            .into_iter()
            .map(|r| r.snapshot)
            .collect())
    }

    async fn get_snapshot(&self, id: &str) -> StratumResult<Snapshot> {
        Ok(self.load_record(id).await?.snapshot)
    }

    async fn create_snapshot_from_image(
        &self,
        image: &str,
        spec: &ResourceSpec,
        metadata: &Metadata,
        digest: Option<&str>,
    ) -> StratumResult<Snapshot> {
        if !self.image_exists(image).await? {
            self.pull(image).await?;
        }

        let record = SnapshotRecord {
            snapshot: Snapshot {
                id: new_snapshot_id(),
                created_at: Utc::now(),
                status: SnapshotStatus::Ready,
                spec: *spec,
                image_id: image.to_string(),
                digest: digest.map(str::to_string),
                metadata: metadata.clone(),
            },
            runnable_image: image.to_string(),
        };
        self.store.save(&record).await?;

        info!("Created snapshot {} from {}", record.snapshot.id, image);
        Ok(record.snapshot)
    }

    async fn delete_snapshot(&self, id: &str) -> StratumResult<()> {
        let record = self.load_record(id).await?;

        // Base images are shared with the rest of the system; only committed ones are ours
        if record.runnable_image.starts_with(SNAPSHOT_REPOSITORY) {
            let output = podman(&["rmi", &record.runnable_image]).await?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(
                    "Keeping image {} for deleted snapshot {}: {}",
                    record.runnable_image,
                    id,
                    stderr.trim()
                );
            }
        }

        self.store.delete(id).await?;
        info!("Deleted snapshot {}", id);
        Ok(())
    }

    async fn set_snapshot_metadata(
        &self,
        id: &str,
        update: &MetadataUpdate,
    ) -> StratumResult<Snapshot> {
        let mut record = self.load_record(id).await?;
        record.snapshot.metadata.apply(update);
        self.store.save(&record).await?;
        Ok(record.snapshot)
    }

    fn backend_name(&self) -> &'static str {
        "Podman"
    }
}

#[async_trait]
impl Sandbox for PodmanBackend {
    async fn start_from_snapshot(&self, snapshot_id: &str) -> StratumResult<Box<dyn Instance>> {
        let record = self.load_record(snapshot_id).await?;
        let name = format!("stratum-{}", &Uuid::new_v4().simple().to_string()[..12]);

        let args = run_args(&name, &record);
        let args_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = podman(&args_refs).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StratumError::command_exec("podman run", stderr.trim()));
        }

        info!("Started instance {} from {}", name, snapshot_id);
        Ok(Box::new(PodmanInstance {
            name,
            record,
            store: self.store.clone(),
        }))
    }
}

/// A container started from a snapshot
pub struct PodmanInstance {
    name: String,
    record: SnapshotRecord,
    store: SnapshotStore,
}

impl PodmanInstance {
    /// Tar a local directory into the container, honoring excludes
    async fn copy_dir(&self, local: &Path, remote: &str, options: &SyncOptions) -> StratumResult<()> {
        let sync_err = |reason: String| StratumError::Sync {
            local: local.to_path_buf(),
            remote: remote.to_string(),
            reason,
        };

        if options.delete {
            podman_ok(&["exec", &self.name, "rm", "-rf", "--", remote]).await?;
        }
        podman_ok(&["exec", &self.name, "mkdir", "-p", "--", remote]).await?;

        let mut tar_cmd = Command::new("tar");
        tar_cmd.arg("-C").arg(local).arg("-cf").arg("-");
        for pattern in &options.exclude {
            tar_cmd.arg(format!("--exclude={}", pattern));
        }
        tar_cmd.arg(".");

        let mut extract_cmd = Command::new("podman");
        extract_cmd.args(["exec", "-i", &self.name, "tar", "-C", remote, "-xf", "-"]);

        let (archive, tar_errors, extract) = pipe_commands(tar_cmd, extract_cmd)
            .await
            .map_err(|e| StratumError::command_failed("tar -cf | podman exec tar -xf", e))?;

        if !archive.success() {
            return Err(sync_err(String::from_utf8_lossy(&tar_errors).trim().to_string()));
        }
        if !extract.status.success() {
            return Err(sync_err(String::from_utf8_lossy(&extract.stderr).trim().to_string()));
        }

        Ok(())
    }
}

/// Pipe `producer`'s stdout into `consumer`
///
/// Returns the producer's exit status and stderr along with the consumer's
/// output. The producer's stderr is drained while the consumer runs, since a
/// full stderr pipe would stall the producer.
async fn pipe_commands(
    mut producer: Command,
    mut consumer: Command,
) -> std::io::Result<(ExitStatus, Vec<u8>, Output)> {
    let mut child = producer
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout: Stdio = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("stdout not piped"))?
        .try_into()?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("stderr not piped"))?;

    let consumed = consumer
        .stdin(stdout)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output();
    let mut errors = Vec::new();
    let (consumed, drained) = tokio::join!(consumed, stderr.read_to_end(&mut errors));
    let consumed = consumed?;
    drained?;

    let status = child.wait().await?;
    Ok((status, errors, consumed))
}

#[async_trait]
impl Instance for PodmanInstance {
    fn id(&self) -> &str {
        &self.name
    }

    async fn status(&self) -> StratumResult<InstanceStatus> {
        let state = podman_ok(&["inspect", "--format", "{{.State.Status}}", &self.name]).await?;
        Ok(parse_container_state(&state))
    }

    async fn execute(&self, command: &str, pty: bool) -> StratumResult<ExecOutput> {
        let mut args = vec!["exec"];
        if pty {
            args.push("-t");
        }
        args.extend([self.name.as_str(), "sh", "-c", command]);
        debug!("Executing in {}: {}", self.name, command);

        let mut child = Command::new("podman")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| StratumError::command_failed(format!("podman exec {}", self.name), e))?;

        let name = &self.name;
        let streamed = stream_child_output(&mut child, &|line| debug!("[{}] {}", name, line)).await?;

        let status = child
            .wait()
            .await
            .map_err(|e| StratumError::command_failed(format!("podman exec {}", self.name), e))?;

        Ok(ExecOutput {
            exit_code: status.code(),
            stdout: join_lines(&streamed.stdout),
            stderr: join_lines(&streamed.stderr),
            output: streamed.interleaved,
        })
    }

    async fn capture_snapshot(
        &self,
        digest: Option<&str>,
        metadata: Option<&Metadata>,
    ) -> StratumResult<Snapshot> {
        let id = new_snapshot_id();
        let tag = snapshot_image_tag(&id);

        let mut args = vec!["commit".to_string()];
        if let Some(digest) = digest {
            args.push("--change".to_string());
            args.push(format!("LABEL {}={}", labels::DIGEST, digest));
        }
        args.push(self.name.clone());
        args.push(tag.clone());

        let args_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        podman_ok(&args_refs).await?;

        let record = SnapshotRecord {
            snapshot: Snapshot {
                id,
                created_at: Utc::now(),
                status: SnapshotStatus::Ready,
                spec: self.record.snapshot.spec,
                image_id: self.record.snapshot.image_id.clone(),
                digest: digest.map(str::to_string),
                metadata: metadata.cloned().unwrap_or_default(),
            },
            runnable_image: tag,
        };
        self.store.save(&record).await?;

        info!("Captured snapshot {} from {}", record.snapshot.id, self.name);
        Ok(record.snapshot)
    }

    async fn stop(&self) -> StratumResult<()> {
        debug!("Removing instance container: {}", self.name);

        let output = podman(&["rm", "-f", &self.name]).await?;

        if output.status.success() {
            Ok(())
        } else {
            // Ignore error if container doesn't exist
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("no such container") {
                Ok(())
            } else {
                Err(StratumError::command_exec("podman rm", stderr.trim()))
            }
        }
    }

    async fn sync_files(
        &self,
        local: &Path,
        remote: &str,
        options: &SyncOptions,
    ) -> StratumResult<()> {
        if !local.exists() {
            return Err(StratumError::PathNotFound(local.to_path_buf()));
        }

        if local.is_dir() {
            return self.copy_dir(local, remote, options).await;
        }

        if let Some((parent, _)) = remote.rsplit_once('/') {
            if !parent.is_empty() {
                podman_ok(&["exec", &self.name, "mkdir", "-p", "--", parent]).await?;
            }
        }

        let local_str = local.to_string_lossy();
        let target = format!("{}:{}", self.name, remote);
        let output = podman(&["cp", &local_str, &target]).await?;
        if !output.status.success() {
            let stderr: Vec<String> = String::from_utf8_lossy(&output.stderr)
                .lines()
                .map(str::to_string)
                .collect();
            return Err(StratumError::Sync {
                local: local.to_path_buf(),
                remote: remote.to_string(),
                reason: error_output_tail(&stderr),
            });
        }

        Ok(())
    }
}

fn join_lines(lines: &[String]) -> String {
    if lines.is_empty() {
        String::new()
    } else {
        format!("{}\n", lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> SnapshotRecord {
        SnapshotRecord {
            snapshot: Snapshot {
                id: "snapshot_abc".to_string(),
                created_at: Utc::now(),
                status: SnapshotStatus::Ready,
                spec: ResourceSpec {
                    vcpus: 2,
                    memory_mb: 2048,
                    disk_size_mb: 8192,
                },
                image_id: "debian:12".to_string(),
                digest: None,
                metadata: Metadata::new(),
            },
            runnable_image: "debian:12".to_string(),
        }
    }

    #[test]
    fn container_state_mapping() {
        assert_eq!(parse_container_state("running\n"), InstanceStatus::Ready);
        assert_eq!(parse_container_state("created"), InstanceStatus::Pending);
        assert_eq!(parse_container_state("paused"), InstanceStatus::Paused);
        assert_eq!(parse_container_state("exited"), InstanceStatus::Error);
    }

    #[test]
    fn run_args_carry_spec_and_label() {
        let args = run_args("stratum-1", &record());

        assert_eq!(&args[..4], ["run", "-d", "--name", "stratum-1"]);
        assert!(args.contains(&"io.stratum.snapshot=snapshot_abc".to_string()));
        assert!(args.contains(&"2048m".to_string()));
        let image_pos = args.iter().position(|a| a == "debian:12").unwrap();
        assert_eq!(args[image_pos + 1], "infinity");
    }

    #[test]
    fn snapshot_ids_are_valid_tags() {
        let id = new_snapshot_id();
        assert!(id.starts_with("snapshot_"));
        assert_eq!(id.len(), "snapshot_".len() + 12);
        assert_eq!(
            snapshot_image_tag(&id),
            format!("localhost/stratum-snapshot:{}", id)
        );
    }

    #[test]
    fn join_lines_terminates() {
        assert_eq!(join_lines(&[]), "");
        assert_eq!(join_lines(&["a".to_string(), "b".to_string()]), "a\nb\n");
    }

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[tokio::test]
    async fn pipe_survives_verbose_producer_stderr() {
        // Well past a 64 KiB pipe buffer
        let producer = sh("head -c 300000 /dev/zero | tr '\\0' w >&2; echo payload; exit 3");
        let consumer = sh("cat > /dev/null");

        let (status, errors, output) = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            pipe_commands(producer, consumer),
        )
        .await
        .expect("pipe stalled")
        .unwrap();

        assert_eq!(status.code(), Some(3));
        assert_eq!(errors.len(), 300_000);
        assert!(output.status.success());
    }

    #[tokio::test]
    async fn pipe_feeds_consumer() {
        let producer = sh("printf abc");
        let consumer = sh("test \"$(cat)\" = abc");

        let (status, errors, output) = pipe_commands(producer, consumer).await.unwrap();

        assert!(status.success());
        assert!(errors.is_empty());
        assert!(output.status.success());
    }
}
