//! Container configuration effect
//!
//! Installs a container engine in the instance, replaces a named container
//! and routes SSH and root login shells into it.

use crate::effect::{shell_quote, Effect};
use crate::error::{StratumError, StratumResult};
use crate::provider::{error_output_tail, Instance};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info};

/// Shell wrapper that enters the configured container
pub const CONTAINER_SHELL: &str = "/usr/local/bin/stratum-container-shell";

const SSHD_DROP_IN: &str = "/etc/ssh/sshd_config.d/stratum-container.conf";

/// Container engine installed in the instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerEngine {
    #[default]
    Docker,
    Podman,
}

impl ContainerEngine {
    /// CLI binary name
    pub fn binary(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }

    fn install_script(&self) -> String {
        let install = match self {
            Self::Docker => "curl -fsSL https://get.docker.com | sh",
            Self::Podman => {
                "(apt-get update && apt-get install -y podman) || dnf install -y podman || apk add podman"
            }
        };
        format!(
            "command -v {} >/dev/null 2>&1 || ({})",
            self.binary(),
            install
        )
    }

    fn start_script(&self) -> &'static str {
        match self {
            Self::Docker => {
                "docker info >/dev/null 2>&1 || systemctl enable --now docker || service docker start || (nohup dockerd >/var/log/dockerd.log 2>&1 & sleep 3)"
            }
            Self::Podman => "systemctl enable --now podman.socket >/dev/null 2>&1 || true",
        }
    }
}

impl fmt::Display for ContainerEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.binary())
    }
}

fn default_name() -> String {
    "app".to_string()
}

fn default_restart_policy() -> String {
    "unless-stopped".to_string()
}

/// Full description of the container to run
///
/// Ports and volumes are sets of `host:container` strings; together with
/// the env map they serialize in sorted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerOptions {
    pub image: String,

    #[serde(default = "default_name")]
    pub name: String,

    /// Command overriding the image default
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub engine: ContainerEngine,

    /// Published ports as `host:container`
    #[serde(default)]
    pub ports: BTreeSet<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Bind mounts as `host:container[:opts]`
    #[serde(default)]
    pub volumes: BTreeSet<String>,

    #[serde(default = "default_restart_policy")]
    pub restart_policy: String,
}

impl ContainerOptions {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            name: default_name(),
            command: None,
            engine: ContainerEngine::default(),
            ports: BTreeSet::new(),
            env: BTreeMap::new(),
            volumes: BTreeSet::new(),
            restart_policy: default_restart_policy(),
        }
    }

    fn run_command(&self) -> String {
        let bin = self.engine.binary();
        let mut args = vec![
            format!("{} run -d", bin),
            format!("--name {}", shell_quote(&self.name)),
            format!("--restart {}", shell_quote(&self.restart_policy)),
        ];
        for port in &self.ports {
            args.push(format!("-p {}", shell_quote(port)));
        }
        for (key, value) in &self.env {
            args.push(format!("-e {}", shell_quote(&format!("{}={}", key, value))));
        }
        for volume in &self.volumes {
            args.push(format!("-v {}", shell_quote(volume)));
        }
        args.push(shell_quote(&self.image));
        if let Some(command) = &self.command {
            args.push(format!("sh -c {}", shell_quote(command)));
        }

        format!(
            "{} rm -f {} >/dev/null 2>&1; {}",
            bin,
            shell_quote(&self.name),
            args.join(" ")
        )
    }

    fn shell_script(&self) -> String {
        let bin = self.engine.binary();
        let name = shell_quote(&self.name);
        format!(
            "#!/bin/sh\n\
             if [ -n \"$SSH_ORIGINAL_COMMAND\" ]; then\n\
             \x20   exec {bin} exec -i {name} sh -c \"$SSH_ORIGINAL_COMMAND\"\n\
             fi\n\
             exec {bin} exec -it {name} sh\n"
        )
    }

    fn rewire_command(&self) -> String {
        let profile_line = format!(
            "[ -z \"$STRATUM_NO_CONTAINER\" ] && [ -t 0 ] && exec {}",
            CONTAINER_SHELL
        );
        format!(
            "cat > {shell} <<'STRATUM_EOF'\n{script}STRATUM_EOF\n\
             chmod 755 {shell} && \
             mkdir -p /etc/ssh/sshd_config.d && \
             printf 'ForceCommand {shell}\\n' > {drop_in} && \
             (systemctl reload ssh >/dev/null 2>&1 || systemctl reload sshd >/dev/null 2>&1 || true) && \
             (grep -qF {shell} /root/.profile 2>/dev/null || echo {line} >> /root/.profile)",
            shell = CONTAINER_SHELL,
            script = self.shell_script(),
            drop_in = SSHD_DROP_IN,
            line = shell_quote(&profile_line),
        )
    }

    /// Named setup steps, run in order
    pub fn setup_steps(&self) -> Vec<(&'static str, String)> {
        vec![
            ("install runtime", self.engine.install_script()),
            ("start daemon", self.engine.start_script().to_string()),
            ("replace container", self.run_command()),
            ("rewire shell", self.rewire_command()),
        ]
    }
}

/// Run a container inside the instance and make it the login environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigureContainer {
    pub options: ContainerOptions,
}

impl ConfigureContainer {
    pub fn new(options: ContainerOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Effect for ConfigureContainer {
    fn kind(&self) -> &'static str {
        "container"
    }

    fn identity(&self) -> String {
        format!("container:{}", serde_json::json!(self.options))
    }

    fn describe(&self) -> String {
        format!(
            "container {} ({}) via {}",
            self.options.name, self.options.image, self.options.engine
        )
    }

    async fn apply(&self, instance: &dyn Instance) -> StratumResult<()> {
        for (step, script) in self.options.setup_steps() {
            debug!("Container setup on {}: {}", instance.id(), step);
            let output = instance.execute(&script, false).await?;

            if let Some(code) = output.failure_code() {
                return Err(StratumError::ContainerSetup {
                    step: step.to_string(),
                    code,
                    output: error_output_tail(&output.lines()),
                });
            }
        }

        info!(
            "Container {} running in {}",
            self.options.name,
            instance.id()
        );
        Ok(())
    }
}
