//! Verification effect
//!
//! Runs a set of checks against the instance. Capturing a verified
//! instance records that the checks passed on that exact state.

use crate::effect::Effect;
use crate::error::{ErrorKind, StratumError, StratumResult};
use crate::provider::{error_output_tail, Instance};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// A single named check
#[async_trait]
pub trait Check: Send + Sync {
    /// Name reported when the check fails
    fn name(&self) -> &str;

    /// String characterizing what the check tests
    fn identity(&self) -> String {
        self.name().to_string()
    }

    /// Run the check, returning an error when it fails
    async fn run(&self, instance: &dyn Instance) -> StratumResult<()>;
}

/// Check that passes when a shell command exits 0
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandCheck {
    pub name: String,
    pub command: String,
}

impl CommandCheck {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
        }
    }
}

#[async_trait]
impl Check for CommandCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn identity(&self) -> String {
        serde_json::json!([self.name, self.command]).to_string()
    }

    async fn run(&self, instance: &dyn Instance) -> StratumResult<()> {
        let output = instance.execute(&self.command, false).await?;
        match output.failure_code() {
            Some(code) => Err(StratumError::CheckFailed {
                name: self.name.clone(),
                reason: format!(
                    "exit code {}: {}",
                    code,
                    error_output_tail(&output.lines())
                ),
            }),
            None => Ok(()),
        }
    }
}

/// Run every check and fail if any of them failed
pub struct Verify {
    pub instructions: String,
    pub checks: Vec<Box<dyn Check>>,
}

impl Verify {
    pub fn new(instructions: impl Into<String>, checks: Vec<Box<dyn Check>>) -> Self {
        Self {
            instructions: instructions.into(),
            checks,
        }
    }
}

#[async_trait]
impl Effect for Verify {
    fn kind(&self) -> &'static str {
        "verify"
    }

    fn identity(&self) -> String {
        let checks: Vec<String> = self.checks.iter().map(|c| c.identity()).collect();
        format!(
            "verify:{}",
            serde_json::json!({
                "instructions": self.instructions,
                "checks": checks,
            })
        )
    }

    fn describe(&self) -> String {
        format!("verify {} ({} checks)", self.instructions, self.checks.len())
    }

    async fn apply(&self, instance: &dyn Instance) -> StratumResult<()> {
        let mut failed = Vec::new();

        for check in &self.checks {
            match check.run(instance).await {
                Ok(()) => debug!("Check '{}' passed", check.name()),
                // Losing the instance is not a verdict on the checks
                Err(e) if matches!(e.kind(), ErrorKind::Transport | ErrorKind::Timeout) => {
                    return Err(e)
                }
                Err(e) => {
                    warn!("Check '{}' failed: {}", check.name(), e);
                    failed.push(check.name().to_string());
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(StratumError::VerificationFailed {
                instructions: self.instructions.clone(),
                failed,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::fake::FakeBackend;
    use crate::provider::Sandbox;

    fn checks(pairs: &[(&str, &str)]) -> Vec<Box<dyn Check>> {
        pairs
            .iter()
            .map(|(name, command)| Box::new(CommandCheck::new(*name, *command)) as Box<dyn Check>)
            .collect()
    }

    #[test]
    fn identity_covers_check_commands() {
        let a = Verify::new("web is up", checks(&[("curl", "curl -fsS localhost")]));
        let b = Verify::new("web is up", checks(&[("curl", "curl -fsS localhost:8080")]));
        let c = Verify::new("web is down", checks(&[("curl", "curl -fsS localhost")]));

        assert!(a.identity().starts_with("verify:"));
        assert_ne!(a.identity(), b.identity());
        assert_ne!(a.identity(), c.identity());
    }

    struct NamedOnly(&'static str);

    #[async_trait]
    impl Check for NamedOnly {
        fn name(&self) -> &str {
            self.0
        }

        async fn run(&self, _instance: &dyn Instance) -> StratumResult<()> {
            Ok(())
        }
    }

    #[test]
    fn default_check_identity_is_its_name() {
        let verify = Verify::new("booted", vec![Box::new(NamedOnly("ssh")) as Box<dyn Check>]);
        assert_eq!(
            verify.identity(),
            r#"verify:{"checks":["ssh"],"instructions":"booted"}"#
        );
    }

    #[tokio::test]
    async fn runs_every_check_and_lists_failures() {
        let backend = FakeBackend::new();
        backend.fail_command("test -f /missing");
        backend.fail_command("pgrep nope");
        let base = backend.seed_snapshot("snap_1", None);
        let instance = backend.start_from_snapshot(&base.id).await.unwrap();

        let verify = Verify::new(
            "service ready",
            checks(&[
                ("file", "test -f /missing"),
                ("uptime", "uptime"),
                ("process", "pgrep nope"),
            ]),
        );
        let err = verify.apply(instance.as_ref()).await.unwrap_err();

        assert_eq!(backend.count("exec"), 3);
        match err {
            StratumError::VerificationFailed { failed, .. } => {
                assert_eq!(failed, vec!["file", "process"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn passes_when_all_checks_pass() {
        let backend = FakeBackend::new();
        let base = backend.seed_snapshot("snap_1", None);
        let instance = backend.start_from_snapshot(&base.id).await.unwrap();

        Verify::new("ok", checks(&[("true", "true")]))
            .apply(instance.as_ref())
            .await
            .unwrap();
    }
}
