//! Shell command effect

use crate::effect::{shell_quote, Effect};
use crate::error::{StratumError, StratumResult};
use crate::provider::{error_output_tail, Instance};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

fn default_pty() -> bool {
    true
}

/// Run a shell command inside the instance
///
/// The identity covers the command text exactly as given plus the resolved
/// flags, so `echo a` and `echo  a` are different cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunCommand {
    pub command: String,

    /// Detach the command with `nohup` and return immediately
    #[serde(default)]
    pub background: bool,

    /// Allocate a pseudo-terminal
    #[serde(default = "default_pty")]
    pub pty: bool,
}

impl RunCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            background: false,
            pty: default_pty(),
        }
    }

    pub fn background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    pub fn pty(mut self, pty: bool) -> Self {
        self.pty = pty;
        self
    }

    /// Command line actually sent to the instance
    fn command_line(&self) -> String {
        if self.background {
            format!(
                "nohup sh -c {} > /dev/null 2>&1 &",
                shell_quote(&self.command)
            )
        } else {
            self.command.clone()
        }
    }
}

impl From<&str> for RunCommand {
    fn from(command: &str) -> Self {
        Self::new(command)
    }
}

impl From<String> for RunCommand {
    fn from(command: String) -> Self {
        Self::new(command)
    }
}

#[async_trait]
impl Effect for RunCommand {
    fn kind(&self) -> &'static str {
        "run"
    }

    fn identity(&self) -> String {
        format!(
            "run:{}",
            serde_json::json!([self.command, self.background, self.pty])
        )
    }

    fn describe(&self) -> String {
        if self.background {
            format!("run (background) {}", self.command)
        } else {
            format!("run {}", self.command)
        }
    }

    async fn apply(&self, instance: &dyn Instance) -> StratumResult<()> {
        let output = instance.execute(&self.command_line(), self.pty).await?;

        for line in &output.output {
            debug!("[{}] {}", instance.id(), line);
        }

        match output.failure_code() {
            Some(code) => Err(StratumError::CommandExit {
                command: self.command.clone(),
                code,
                output: error_output_tail(&output.lines()),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::provider::fake::FakeBackend;
    use crate::provider::Sandbox;

    #[test]
    fn identity_covers_flags() {
        let plain = RunCommand::new("apt-get update");
        assert_eq!(plain.identity(), r#"run:["apt-get update",false,true]"#);
        assert_ne!(plain.identity(), plain.clone().pty(false).identity());
        assert_ne!(plain.identity(), plain.clone().background(true).identity());
    }

    #[test]
    fn explicit_defaults_share_identity() {
        let implicit = RunCommand::from("make");
        let explicit = RunCommand::new("make").background(false).pty(true);
        assert_eq!(implicit.identity(), explicit.identity());
    }

    #[test]
    fn whitespace_is_significant() {
        assert_ne!(
            RunCommand::new("echo a").identity(),
            RunCommand::new("echo  a").identity()
        );
    }

    #[test]
    fn identity_is_not_ambiguous() {
        // A command containing the flag text must not collide with real flags
        let tricky = RunCommand::new(r#"echo",true,"x"#);
        assert_ne!(tricky.identity(), RunCommand::new("echo").identity());
    }

    #[test]
    fn deserializes_with_defaults() {
        let run: RunCommand = toml::from_str(r#"command = "make""#).unwrap();
        assert_eq!(run, RunCommand::new("make"));
    }

    #[test]
    fn background_wraps_in_nohup() {
        let run = RunCommand::new("python3 -m http.server").background(true);
        assert_eq!(
            run.command_line(),
            "nohup sh -c 'python3 -m http.server' > /dev/null 2>&1 &"
        );
    }

    #[tokio::test]
    async fn nonzero_exit_fails() {
        let backend = FakeBackend::new();
        backend.fail_command("exit 3");
        let base = backend.seed_snapshot("snap_1", None);
        let instance = backend.start_from_snapshot(&base.id).await.unwrap();

        let err = RunCommand::new("exit 3")
            .apply(instance.as_ref())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EffectExecution);

        RunCommand::new("true").apply(instance.as_ref()).await.unwrap();
        assert!(backend.events().contains(&"exec:true:true".to_string()));
    }
}
