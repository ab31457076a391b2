//! Remote control plane backend
//!
//! REST client for the hosted VM service. Requests are blocking `ureq`
//! calls moved onto the blocking pool; file sync shells out to `rsync`
//! over SSH.

use crate::config::schema::RemoteConfig;
use crate::error::{StratumError, StratumResult};
use crate::provider::backend::{Instance, Registry, Sandbox, SyncOptions};
use crate::provider::{error_output_tail, validate_id};
use crate::snapshot::{
    ExecOutput, InstanceInfo, InstanceStatus, Metadata, MetadataUpdate, ResourceSpec, Snapshot,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Environment variable holding the API key
pub const API_KEY_ENV: &str = "STRATUM_API_KEY";

#[derive(Debug, Clone, Copy)]
enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        };
        write!(f, "{}", name)
    }
}

/// API key from the environment, falling back to the configured one
fn resolve_api_key(configured: Option<&str>) -> StratumResult<String> {
    std::env::var(API_KEY_ENV)
        .ok()
        .filter(|key| !key.is_empty())
        .or_else(|| configured.filter(|key| !key.is_empty()).map(str::to_string))
        .ok_or(StratumError::ApiKeyMissing)
}

fn map_ureq_error(operation: &str, err: ureq::Error) -> StratumError {
    match err {
        ureq::Error::StatusCode(status) => StratumError::ApiStatus {
            operation: operation.to_string(),
            status,
        },
        other => StratumError::transport(operation, other),
    }
}

/// Turn a 404 into the matching not-found error
fn not_found_as(err: StratumError, not_found: impl FnOnce() -> StratumError) -> StratumError {
    match err {
        StratumError::ApiStatus { status: 404, .. } => not_found(),
        other => other,
    }
}

/// Arguments for `rsync` pushing `local` to `destination`
fn rsync_args(local: &Path, destination: &str, ssh_port: u16, options: &SyncOptions) -> Vec<String> {
    let mut args = vec![
        "-az".to_string(),
        "-e".to_string(),
        format!("ssh -p {}", ssh_port),
    ];
    if options.delete {
        args.push("--delete".to_string());
    }
    for pattern in &options.exclude {
        args.push(format!("--exclude={}", pattern));
    }

    // Trailing slash copies directory contents rather than the directory itself
    let mut source = local.to_string_lossy().to_string();
    if local.is_dir() && !source.ends_with('/') {
        source.push('/');
    }
    args.push(source);
    args.push(destination.to_string());
    args
}

#[derive(Serialize)]
struct CreateSnapshotRequest<'a> {
    image_id: &'a str,
    spec: &'a ResourceSpec,
    metadata: &'a Metadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    digest: Option<&'a str>,
}

#[derive(Serialize)]
struct ExecRequest<'a> {
    command: &'a str,
    pty: bool,
}

#[derive(Serialize)]
struct CaptureRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a Metadata>,
}

struct ClientInner {
    agent: ureq::Agent,
    base_url: String,
    api_key: String,
    ssh_host: String,
    ssh_port: u16,
}

impl ClientInner {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Perform one blocking request. An empty body decodes as `null`.
    fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> StratumResult<Value> {
        let url = self.url(path);
        let operation = format!("{} {}", method, path);
        let auth = format!("Bearer {}", self.api_key);
        debug!("Request: {}", operation);

        let result = match method {
            Method::Get | Method::Delete => {
                let mut request = match method {
                    Method::Get => self.agent.get(url.as_str()),
                    _ => self.agent.delete(url.as_str()),
                };
                for (key, value) in query {
                    request = request.query(key, value);
                }
                request.header("Authorization", auth.as_str()).call()
            }
            Method::Post | Method::Put => {
                let mut request = match method {
                    Method::Post => self.agent.post(url.as_str()),
                    _ => self.agent.put(url.as_str()),
                };
                for (key, value) in query {
                    request = request.query(key, value);
                }
                let request = request.header("Authorization", auth.as_str());
                match body {
                    Some(body) => request.send_json(body),
                    None => request.send_empty(),
                }
            }
        };

        let mut response = result.map_err(|e| map_ureq_error(&operation, e))?;
        let text = response
            .body_mut()
            .read_to_string()
            .map_err(|e| map_ureq_error(&operation, e))?;

        if text.trim().is_empty() {
            Ok(Value::Null)
        } else {
            serde_json::from_str(&text)
                .map_err(|e| StratumError::transport(operation, format!("invalid response: {}", e)))
        }
    }
}

/// Client for the hosted control plane. Clones share one connection pool.
#[derive(Clone)]
pub struct RemoteClient {
    inner: Arc<ClientInner>,
}

impl RemoteClient {
    /// Build a client from the `[remote]` config section
    pub fn from_config(config: &RemoteConfig) -> StratumResult<Self> {
        let api_key = resolve_api_key(config.api_key.as_deref())?;
        Ok(Self::new(
            &config.base_url,
            api_key,
            &config.ssh_host,
            config.ssh_port,
            Duration::from_secs(config.request_timeout_secs),
        ))
    }

    /// Build a client with explicit settings
    pub fn new(
        base_url: &str,
        api_key: String,
        ssh_host: &str,
        ssh_port: u16,
        timeout: Duration,
    ) -> Self {
        let agent = ureq::Agent::new_with_config(
            ureq::Agent::config_builder()
                .timeout_global(Some(timeout))
                .build(),
        );

        Self {
            inner: Arc::new(ClientInner {
                agent,
                base_url: base_url.to_string(),
                api_key,
                ssh_host: ssh_host.to_string(),
                ssh_port,
            }),
        }
    }

    async fn request_value(
        &self,
        method: Method,
        path: String,
        query: Vec<(String, String)>,
        body: Option<Value>,
    ) -> StratumResult<Value> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.send(method, &path, &query, body.as_ref()))
            .await
            .map_err(|e| StratumError::Internal(format!("request task failed: {}", e)))?
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: String,
        query: Vec<(String, String)>,
        body: Option<Value>,
    ) -> StratumResult<T> {
        let operation = format!("{} {}", method, path);
        let value = self.request_value(method, path, query, body).await?;
        serde_json::from_value(value)
            .map_err(|e| StratumError::transport(operation, format!("unexpected response: {}", e)))
    }

    /// Fetch the current record of an instance
    pub async fn get_instance(&self, id: &str) -> StratumResult<InstanceInfo> {
        validate_id("instance", id)?;
        self.request(Method::Get, format!("/instance/{}", id), vec![], None)
            .await
            .map_err(|e| not_found_as(e, || StratumError::InstanceNotFound(id.to_string())))
    }
}

#[async_trait]
impl Registry for RemoteClient {
    async fn list_snapshots_by_digest(&self, digest: &str) -> StratumResult<Vec<Snapshot>> {
        self.request(
            Method::Get,
            "/snapshot".to_string(),
            vec![("digest".to_string(), digest.to_string())],
            None,
        )
        .await
    }

    async fn list_snapshots(&self) -> StratumResult<Vec<Snapshot>> {
        self.request(Method::Get, "/snapshot".to_string(), vec![], None)
            .await
    }

    async fn get_snapshot(&self, id: &str) -> StratumResult<Snapshot> {
        validate_id("snapshot", id)?;
        self.request(Method::Get, format!("/snapshot/{}", id), vec![], None)
            .await
            .map_err(|e| not_found_as(e, || StratumError::SnapshotNotFound(id.to_string())))
    }

    async fn create_snapshot_from_image(
        &self,
        image: &str,
        spec: &ResourceSpec,
        metadata: &Metadata,
        digest: Option<&str>,
    ) -> StratumResult<Snapshot> {
        let body = serde_json::to_value(CreateSnapshotRequest {
            image_id: image,
            spec,
            metadata,
            digest,
        })?;
        let snapshot: Snapshot = self
            .request(Method::Post, "/snapshot".to_string(), vec![], Some(body))
            .await?;
        info!("Created snapshot {} from {}", snapshot.id, image);
        Ok(snapshot)
    }

    async fn delete_snapshot(&self, id: &str) -> StratumResult<()> {
        validate_id("snapshot", id)?;
        self.request_value(Method::Delete, format!("/snapshot/{}", id), vec![], None)
            .await
            .map_err(|e| not_found_as(e, || StratumError::SnapshotNotFound(id.to_string())))?;
        Ok(())
    }

    async fn set_snapshot_metadata(
        &self,
        id: &str,
        update: &MetadataUpdate,
    ) -> StratumResult<Snapshot> {
        validate_id("snapshot", id)?;
        let method = match update {
            MetadataUpdate::Merge(_) => Method::Post,
            MetadataUpdate::Replace(_) => Method::Put,
        };
        let body = serde_json::to_value(update.entries())?;
        self.request(method, format!("/snapshot/{}/metadata", id), vec![], Some(body))
            .await
            .map_err(|e| not_found_as(e, || StratumError::SnapshotNotFound(id.to_string())))
    }

    fn backend_name(&self) -> &'static str {
        "Remote"
    }
}

#[async_trait]
impl Sandbox for RemoteClient {
    async fn start_from_snapshot(&self, snapshot_id: &str) -> StratumResult<Box<dyn Instance>> {
        validate_id("snapshot", snapshot_id)?;
        let info: InstanceInfo = self
            .request(
                Method::Post,
                "/instance".to_string(),
                vec![("snapshot_id".to_string(), snapshot_id.to_string())],
                None,
            )
            .await
            .map_err(|e| not_found_as(e, || StratumError::SnapshotNotFound(snapshot_id.to_string())))?;
        validate_id("instance", &info.id)?;

        info!("Started instance {} from {}", info.id, snapshot_id);
        Ok(Box::new(RemoteInstance {
            id: info.id,
            client: self.clone(),
        }))
    }
}

/// An instance on the hosted control plane
pub struct RemoteInstance {
    id: String,
    client: RemoteClient,
}

#[async_trait]
impl Instance for RemoteInstance {
    fn id(&self) -> &str {
        &self.id
    }

    async fn status(&self) -> StratumResult<InstanceStatus> {
        Ok(self.client.get_instance(&self.id).await?.status)
    }

    async fn execute(&self, command: &str, pty: bool) -> StratumResult<ExecOutput> {
        debug!("Executing in {}: {}", self.id, command);
        let body = serde_json::to_value(ExecRequest { command, pty })?;
        let output: ExecOutput = self
            .client
            .request(Method::Post, format!("/instance/{}/exec", self.id), vec![], Some(body))
            .await?;

        for line in &output.output {
            debug!("[{}] {}", self.id, line);
        }
        Ok(output)
    }

    async fn capture_snapshot(
        &self,
        digest: Option<&str>,
        metadata: Option<&Metadata>,
    ) -> StratumResult<Snapshot> {
        let query = digest
            .map(|d| vec![("digest".to_string(), d.to_string())])
            .unwrap_or_default();
        let body = serde_json::to_value(CaptureRequest { metadata })?;
        let snapshot: Snapshot = self
            .client
            .request(
                Method::Post,
                format!("/instance/{}/snapshot", self.id),
                query,
                Some(body),
            )
            .await?;
        info!("Captured snapshot {} from {}", snapshot.id, self.id);
        Ok(snapshot)
    }

    async fn stop(&self) -> StratumResult<()> {
        debug!("Stopping instance {}", self.id);
        self.client
            .request_value(Method::Delete, format!("/instance/{}", self.id), vec![], None)
            .await?;
        Ok(())
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

        let destination = format!("{}@{}:{}", self.id, self.client.inner.ssh_host, remote);
        let args = rsync_args(local, &destination, self.client.inner.ssh_port, options);
        debug!("Executing: rsync {:?}", args);

        let output = Command::new("rsync")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| StratumError::command_failed("rsync", e))?;

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
