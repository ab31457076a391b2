//! Snapshot and instance data model

use crate::snapshot::metadata::Metadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Characters of an id shown by [`Snapshot::short_id`]
const SHORT_ID_LEN: usize = 20;

/// Resources reserved for a snapshot and the instances started from it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Virtual CPUs
    pub vcpus: u32,
    /// Memory in MB
    pub memory_mb: u32,
    /// Disk size in MB
    pub disk_size_mb: u32,
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            vcpus: 1,
            memory_mb: 1024,
            disk_size_mb: 8192,
        }
    }
}

/// Snapshot lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    Pending,
    Ready,
    Failed,
    Deleting,
    Deleted,
}

impl fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
        };
        write!(f, "{}", name)
    }
}

/// Immutable captured machine state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Registry-assigned identity
    pub id: String,

    /// When the registry created the snapshot
    pub created_at: DateTime<Utc>,

    /// Current status
    pub status: SnapshotStatus,

    /// Resources for instances started from this snapshot
    pub spec: ResourceSpec,

    /// Image the snapshot was originally created from
    pub image_id: String,

    /// Content digest used as the cache key
    #[serde(default)]
    pub digest: Option<String>,

    /// Free-form metadata
    #[serde(default)]
    pub metadata: Metadata,
}

impl Snapshot {
    /// The value a chained fingerprint starts from.
    ///
    /// A snapshot without a digest still anchors a chain through its id.
    pub fn chain_parent(&self) -> &str {
        self.digest.as_deref().unwrap_or(&self.id)
    }

    /// Short form of the id for display
    pub fn short_id(&self) -> &str {
        self.id
            .char_indices()
            .nth(SHORT_ID_LEN)
            .map_or(self.id.as_str(), |(end, _)| &self.id[..end])
    }
}

/// Instance lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Pending,
    Ready,
    Paused,
    Saving,
    Error,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Paused => "paused",
            Self::Saving => "saving",
            Self::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// Network endpoint exposed by an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    pub port: u16,
    pub url: String,
}

/// Record of a running instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub id: String,
    pub status: InstanceStatus,
    pub spec: ResourceSpec,
    /// Snapshot the instance was started from; never changes
    pub snapshot_id: String,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Result of a command executed inside an instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    /// Exit code, `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Stdout and stderr lines in arrival order
    #[serde(default)]
    pub output: Vec<String>,
}

impl ExecOutput {
    /// The exit code when it is non-zero; a signal-killed command has none
    pub fn failure_code(&self) -> Option<i32> {
        self.exit_code.filter(|code| *code != 0)
    }

    /// Output lines in arrival order, falling back to stdout then stderr
    pub fn lines(&self) -> Vec<String> {
        if self.output.is_empty() {
            self.stdout
                .lines()
                .chain(self.stderr.lines())
                .map(str::to_string)
                .collect()
        } else {
            self.output.clone()
        }
    }
}
