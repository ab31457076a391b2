//! Configuration schema for stratum
//!
//! Configuration is stored at `~/.config/stratum/config.toml`

use crate::snapshot::ResourceSpec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Which backend hosts snapshots and instances
    pub backend: BackendConfig,

    /// Remote control plane settings
    pub remote: RemoteConfig,

    /// Local podman settings
    pub podman: PodmanConfig,

    /// Defaults for snapshots created from images
    pub snapshot: SnapshotConfig,

    /// Build cache settings
    pub cache: CacheConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Append cache hits and builds to the build journal
    pub journal: bool,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            journal: true,
            log_format: "text".to_string(),
        }
    }
}

/// Supported backends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Local containers via rootless podman
    #[default]
    Podman,
    /// Hosted VM control plane
    Remote,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Podman => write!(f, "podman"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Backend selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
}

/// Remote control plane configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the REST API
    pub base_url: String,

    /// API key; `STRATUM_API_KEY` takes precedence
    pub api_key: Option<String>,

    /// Host accepting SSH connections for file sync
    pub ssh_host: String,

    /// SSH port
    pub ssh_port: u16,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.stratum.dev/v1".to_string(),
            api_key: None,
            ssh_host: "ssh.stratum.dev".to_string(),
            ssh_port: 22,
            request_timeout_secs: 120,
        }
    }
}

/// Podman backend configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PodmanConfig {
    /// Override the snapshot record directory
    pub state_dir: Option<PathBuf>,
}

/// Resource defaults for new snapshots
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub vcpus: u32,
    pub memory_mb: u32,
    pub disk_size_mb: u32,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        let spec = ResourceSpec::default();
        Self {
            vcpus: spec.vcpus,
            memory_mb: spec.memory_mb,
            disk_size_mb: spec.disk_size_mb,
        }
    }
}

impl SnapshotConfig {
    /// Resource spec built from these defaults
    pub fn spec(&self) -> ResourceSpec {
        ResourceSpec {
            vcpus: self.vcpus,
            memory_mb: self.memory_mb,
            disk_size_mb: self.disk_size_mb,
        }
    }
}

/// Build cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a fresh instance may take to become ready
    pub ready_timeout_secs: u64,

    /// Interval between readiness polls
    pub poll_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ready_timeout_secs: 300,
            poll_interval_ms: 1000,
        }
    }
}

impl CacheConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[cache]"));
        assert!(toml.contains("kind = \"podman\""));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.backend.kind, BackendKind::Podman);
        assert_eq!(config.cache.ready_timeout(), Duration::from_secs(300));
        assert_eq!(config.cache.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [backend]
            kind = "remote"

            [remote]
            base_url = "http://localhost:8080"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.backend.kind, BackendKind::Remote);
        assert_eq!(config.remote.base_url, "http://localhost:8080");
        assert_eq!(config.remote.ssh_port, 22); // default preserved
        assert_eq!(config.snapshot.spec(), ResourceSpec::default());
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let toml = r#"
            [backend]
            kind = "firecracker"
        "#;
        assert!(toml::from_str::<Config>(toml).is_err());
    }
}
