//! Error types for stratum
//!
//! All modules use `StratumResult<T>` as their return type. `ErrorKind`
//! groups the variants into the categories callers branch on.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for stratum operations
pub type StratumResult<T> = Result<T, StratumError>;

/// Stage of a cache-miss build at which a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    /// Registry lookup by digest
    Lookup,
    /// Starting an instance from the base snapshot
    Start,
    /// Waiting for the instance to report ready
    Ready,
    /// Running the effect against the instance
    Effect,
    /// Capturing the resulting snapshot
    Capture,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Lookup => "lookup",
            Self::Start => "start",
            Self::Ready => "ready",
            Self::Effect => "effect",
            Self::Capture => "capture",
        };
        write!(f, "{}", name)
    }
}

/// Broad error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Registry or sandbox control plane call failed
    Transport,
    /// Instance did not become ready in time
    Timeout,
    /// Instance reported an error status
    Sandbox,
    /// The applied effect failed
    EffectExecution,
    /// Local or remote filesystem failure
    Io,
    /// Invalid configuration or build plan
    Config,
    /// Anything else
    Internal,
}

/// All errors that can occur in stratum
#[derive(Error, Debug)]
pub enum StratumError {
    // Control plane errors
    #[error("{operation} failed: {reason}")]
    Transport { operation: String, reason: String },

    #[error("{operation} failed with HTTP status {status}")]
    ApiStatus { operation: String, status: u16 },

    #[error("No API key configured for the remote backend")]
    ApiKeyMissing,

    #[error("Podman not found. Install it from https://podman.io")]
    PodmanNotFound,

    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution error: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    // Registry errors
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    // Readiness errors
    #[error("Instance {instance} not ready after {timeout_secs}s")]
    ReadyTimeout { instance: String, timeout_secs: u64 },

    #[error("Instance {instance} entered status {status}")]
    InstanceFailed { instance: String, status: String },

    // Effect errors
    #[error("Command exited with code {code}: {command}")]
    CommandExit {
        command: String,
        code: i32,
        output: String,
    },

    #[error("Container setup failed at {step} (exit code {code})")]
    ContainerSetup {
        step: String,
        code: i32,
        output: String,
    },

    #[error("Verification '{instructions}' failed: {}", failed.join(", "))]
    VerificationFailed {
        instructions: String,
        failed: Vec<String>,
    },

    #[error("Check '{name}' failed: {reason}")]
    CheckFailed { name: String, reason: String },

    #[error("Failed to build {effect} on {snapshot} ({stage}): {source}")]
    Build {
        stage: BuildStage,
        effect: String,
        snapshot: String,
        #[source]
        source: Box<StratumError>,
    },

    // File sync errors
    #[error("Sync {local} -> {remote} failed: {reason}")]
    Sync {
        local: PathBuf,
        remote: String,
        reason: String,
    },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid build plan: {0}")]
    PlanInvalid(String),

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl StratumError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Create a transport error
    pub fn transport(operation: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Transport {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Wrap an error with the build context it happened in
    pub fn build(
        stage: BuildStage,
        effect: impl Into<String>,
        snapshot: impl Into<String>,
        source: StratumError,
    ) -> Self {
        Self::Build {
            stage,
            effect: effect.into(),
            snapshot: snapshot.into(),
            source: Box::new(source),
        }
    }

    /// Categorize the error
    ///
    /// A `Build` wrapper reports the kind of its source. Effect-stage
    /// failures that are not control plane, filesystem or readiness
    /// failures report `EffectExecution`.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. }
            | Self::ApiStatus { .. }
            | Self::ApiKeyMissing
            | Self::PodmanNotFound
            | Self::CommandFailed { .. }
            | Self::CommandExecution { .. }
            | Self::SnapshotNotFound(_)
            | Self::InstanceNotFound(_) => ErrorKind::Transport,
            Self::ReadyTimeout { .. } => ErrorKind::Timeout,
            Self::InstanceFailed { .. } => ErrorKind::Sandbox,
            Self::CommandExit { .. }
            | Self::ContainerSetup { .. }
            | Self::VerificationFailed { .. }
            | Self::CheckFailed { .. } => ErrorKind::EffectExecution,
            Self::Sync { .. } | Self::Io { .. } | Self::PathNotFound(_) => ErrorKind::Io,
            Self::ConfigInvalid { .. }
            | Self::ConfigDirCreate { .. }
            | Self::PlanInvalid(_)
            | Self::TomlParse(_)
            | Self::TomlSerialize(_) => ErrorKind::Config,
            Self::Json(_) | Self::Internal(_) | Self::User(_) => ErrorKind::Internal,
            Self::Build { stage, source, .. } => match (stage, source.kind()) {
                (
                    BuildStage::Effect,
                    ErrorKind::Config | ErrorKind::Internal | ErrorKind::EffectExecution,
                ) => ErrorKind::EffectExecution,
                (_, kind) => kind,
            },
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::ApiKeyMissing => Some("Set STRATUM_API_KEY or remote.api_key in the config"),
            Self::PodmanNotFound => Some("Install podman, or set backend.kind = \"remote\""),
            Self::ReadyTimeout { .. } => Some("Raise cache.ready_timeout_secs in the config"),
            Self::Build { source, .. } => source.hint(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StratumError::SnapshotNotFound("snapshot_1".to_string());
        assert!(err.to_string().contains("Snapshot not found"));
    }

    #[test]
    fn error_hint() {
        let err = StratumError::ApiKeyMissing;
        assert_eq!(
            err.hint(),
            Some("Set STRATUM_API_KEY or remote.api_key in the config")
        );
    }

    #[test]
    fn build_wrapper_reports_source_kind() {
        let timeout = StratumError::build(
            BuildStage::Ready,
            "run",
            "snapshot_1",
            StratumError::ReadyTimeout {
                instance: "inst_1".to_string(),
                timeout_secs: 5,
            },
        );
        assert_eq!(timeout.kind(), ErrorKind::Timeout);
        assert!(timeout.hint().is_some());

        let sync = StratumError::build(
            BuildStage::Effect,
            "copy",
            "snapshot_1",
            StratumError::PathNotFound(PathBuf::from("/missing")),
        );
        assert_eq!(sync.kind(), ErrorKind::Io);
    }

    #[test]
    fn effect_stage_failures_are_effect_execution() {
        let err = StratumError::build(
            BuildStage::Effect,
            "verify",
            "snapshot_1",
            StratumError::Internal("check panicked".to_string()),
        );
        assert_eq!(err.kind(), ErrorKind::EffectExecution);

        let exit = StratumError::CommandExit {
            command: "false".to_string(),
            code: 1,
            output: String::new(),
        };
        assert_eq!(exit.kind(), ErrorKind::EffectExecution);
    }

    #[test]
    fn verification_lists_failed_checks() {
        let err = StratumError::VerificationFailed {
            instructions: "web is up".to_string(),
            failed: vec!["curl".to_string(), "port".to_string()],
        };
        assert_eq!(err.to_string(), "Verification 'web is up' failed: curl, port");
    }
}
