//! Snapshot registries and execution sandboxes
//!
//! Provides the backend-agnostic interfaces the cache engine consumes:
//! - Podman: committed images as snapshots, containers as instances
//! - Remote: the hosted VM control plane over REST

mod backend;
mod factory;
#[cfg(test)]
pub(crate) mod fake;
pub mod podman;
pub mod remote;
pub mod store;

pub use backend::{Instance, Registry, Sandbox, SyncOptions};
pub use factory::{create_backend, Backend};
pub use podman::PodmanBackend;
pub use remote::RemoteClient;
pub use store::SnapshotStore;

use crate::error::{StratumError, StratumResult};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Max number of output lines to include in error messages.
const ERROR_TAIL_LINES: usize = 50;

/// Extract the useful tail of command output for error diagnostics.
pub(crate) fn error_output_tail(lines: &[String]) -> String {
    let total = lines.len();
    let start = total.saturating_sub(ERROR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Lines captured from a child process
#[derive(Debug, Default)]
pub(crate) struct StreamedOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    /// Both streams in arrival order
    pub interleaved: Vec<String>,
}

/// Stream stdout+stderr from a child process, calling `on_output` for each line.
///
/// Standalone async function (not behind `async_trait`) so the `dyn Fn`
/// callback does not need a `'static` bound.
pub(crate) async fn stream_child_output(
    child: &mut tokio::process::Child,
    on_output: &(dyn Fn(&str) + Send + Sync),
) -> StratumResult<StreamedOutput> {
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| StratumError::Internal("child stderr not piped".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| StratumError::Internal("child stdout not piped".to_string()))?;

    let mut stderr_reader = BufReader::new(stderr).lines();
    let mut stdout_reader = BufReader::new(stdout).lines();

    let mut output = StreamedOutput::default();
    let mut stderr_done = false;
    let mut stdout_done = false;

    while !stderr_done || !stdout_done {
        tokio::select! {
            line = stderr_reader.next_line(), if !stderr_done => {
                match line {
                    Ok(Some(line)) => {
                        on_output(&line);
                        output.interleaved.push(line.clone());
                        output.stderr.push(line);
                    }
                    _ => stderr_done = true,
                }
            }
            line = stdout_reader.next_line(), if !stdout_done => {
                match line {
                    Ok(Some(line)) => {
                        on_output(&line);
                        output.interleaved.push(line.clone());
                        output.stdout.push(line);
                    }
                    _ => stdout_done = true,
                }
            }
        }
    }

    Ok(output)
}

/// Validate that an id is safe to embed in a path or URL segment.
pub(crate) fn validate_id(kind: &str, id: &str) -> StratumResult<()> {
    if id.is_empty() {
        return Err(StratumError::User(format!("{} id cannot be empty", kind)));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        || id.contains("..")
    {
        return Err(StratumError::User(format!(
            "Invalid {} id '{}': must contain only alphanumeric characters, '-', '_' or '.'",
            kind, id
        )));
    }
    Ok(())
}
