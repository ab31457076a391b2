//! Build plan parsing and execution
//!
//! A build plan (`stratum.toml`) names a base and an ordered list of steps.
//! Each step becomes one cached effect applied to the previous step's
//! snapshot.
//!
//! ```toml
//! [base]
//! image = "debian:12"
//! memory_mb = 2048
//!
//! [[step]]
//! run = "apt-get update"
//!
//! [[step]]
//! copy = { src = "./app", dest = "/srv/app" }
//! ```

use crate::cache::{fingerprint, EffectCache};
use crate::effect::{
    Catalog, Check, CommandCheck, ConfigureContainer, ContainerOptions, CopyFiles, Effect,
    RunCommand, Verify,
};
use crate::error::{StratumError, StratumResult};
use crate::provider::{Registry, SyncOptions};
use crate::snapshot::{Metadata, ResourceSpec, Snapshot};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Conventional plan file name
pub const PLAN_FILE: &str = "stratum.toml";

/// Metadata key recording the image a base snapshot was created from
pub const BASE_IMAGE_KEY: &str = "stratum.base-image";

/// Parsed build plan
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildPlan {
    /// Snapshot the first step builds on
    pub base: PlanBase,

    /// Steps in application order
    #[serde(default, rename = "step")]
    pub steps: Vec<PlanStep>,

    /// Directory relative copy sources resolve against
    #[serde(skip)]
    root: Option<PathBuf>,
}

/// `[base]` section: an existing snapshot or an image
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanBase {
    pub snapshot: Option<String>,
    pub image: Option<String>,
    pub vcpus: Option<u32>,
    pub memory_mb: Option<u32>,
    pub disk_size_mb: Option<u32>,
}

/// A `run` step: a bare command or a table with flags
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RunStep {
    Command(String),
    Full(RunCommand),
}

/// A `copy` step
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CopyStep {
    pub src: PathBuf,
    pub dest: String,
    #[serde(default)]
    pub delete: bool,
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// A `verify` step
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifyStep {
    pub instructions: String,
    #[serde(default)]
    pub checks: Vec<CommandCheck>,
}

/// One `[[step]]` entry. Exactly one action must be set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanStep {
    pub run: Option<RunStep>,
    pub copy: Option<CopyStep>,
    pub container: Option<ContainerOptions>,
    pub verify: Option<VerifyStep>,
}

impl PlanStep {
    /// Build the effect this step describes
    pub fn effect(&self, root: Option<&Path>) -> StratumResult<Box<dyn Effect>> {
        let actions = [
            self.run.is_some(),
            self.copy.is_some(),
            self.container.is_some(),
            self.verify.is_some(),
        ];
        if actions.iter().filter(|set| **set).count() != 1 {
            return Err(StratumError::PlanInvalid(
                "each step needs exactly one of run, copy, container, verify".to_string(),
            ));
        }

        if let Some(run) = &self.run {
            let command = match run {
                RunStep::Command(command) => RunCommand::new(command.as_str()),
                RunStep::Full(command) => command.clone(),
            };
            return Ok(Box::new(command));
        }

        if let Some(copy) = &self.copy {
            let mut effect = CopyFiles::new(&copy.src, &copy.dest).with_options(SyncOptions {
                delete: copy.delete,
                exclude: copy.exclude.clone(),
            });
            if let Some(root) = root {
                effect = effect.relative_to(root);
            }
            return Ok(Box::new(effect));
        }

        if let Some(container) = &self.container {
            return Ok(Box::new(ConfigureContainer::new(container.clone())));
        }

        match &self.verify {
            Some(verify) => {
                let checks = verify
                    .checks
                    .iter()
                    .cloned()
                    .map(|check| Box::new(check) as Box<dyn Check>)
                    .collect();
                Ok(Box::new(Verify::new(&verify.instructions, checks)))
            }
            None => Err(StratumError::Internal("step without action".to_string())),
        }
    }
}

/// Outcome of one executed step
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub describe: String,
    pub digest: String,
    pub snapshot_id: String,
    pub cached: bool,
}

/// Outcome of an executed plan
#[derive(Debug, Clone)]
pub struct PlanReport {
    pub base: Snapshot,
    pub steps: Vec<StepOutcome>,
    /// Snapshot produced by the last step, or the base for an empty plan
    pub snapshot: Snapshot,
}

impl PlanReport {
    /// Number of steps served from the cache
    pub fn cached_count(&self) -> usize {
        self.steps.iter().filter(|s| s.cached).count()
    }
}

/// Step identity and digest computed without touching a backend
#[derive(Debug, Clone)]
pub struct StepPreview {
    pub describe: String,
    pub identity: String,
    pub digest: String,
}

/// Digest given to a base snapshot created from `image` with `spec`
pub fn base_image_digest(image: &str, spec: &ResourceSpec) -> String {
    fingerprint(
        "image",
        &serde_json::json!([image, spec.vcpus, spec.memory_mb, spec.disk_size_mb]).to_string(),
    )
}

impl BuildPlan {
    /// Parse a plan from a file; relative copy sources resolve against its directory
    pub async fn from_file(path: &Path) -> StratumResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| StratumError::io(format!("reading build plan {}", path.display()), e))?;
        let mut plan = Self::parse(&content)?;
        plan.root = path
            .parent()
            .map(|p| if p.as_os_str().is_empty() { Path::new(".") } else { p })
            .map(Path::to_path_buf);
        Ok(plan)
    }

    /// Parse and validate a plan from a TOML string
    pub fn parse(content: &str) -> StratumResult<Self> {
        let plan: Self =
            toml::from_str(content).map_err(|e| StratumError::PlanInvalid(e.to_string()))?;
        plan.validate()?;
        Ok(plan)
    }

    fn validate(&self) -> StratumResult<()> {
        match (&self.base.snapshot, &self.base.image) {
            (Some(_), None) | (None, Some(_)) => {}
            _ => {
                return Err(StratumError::PlanInvalid(
                    "[base] needs exactly one of snapshot, image".to_string(),
                ))
            }
        }

        if self.base.snapshot.is_some()
            && (self.base.vcpus.is_some()
                || self.base.memory_mb.is_some()
                || self.base.disk_size_mb.is_some())
        {
            return Err(StratumError::PlanInvalid(
                "[base] resources only apply to image bases".to_string(),
            ));
        }

        for (index, step) in self.steps.iter().enumerate() {
            step.effect(None).map_err(|e| match e {
                StratumError::PlanInvalid(reason) => {
                    StratumError::PlanInvalid(format!("step {}: {}", index + 1, reason))
                }
                other => other,
            })?;
        }
        Ok(())
    }

    /// Effects for every step, in order
    pub fn effects(&self) -> StratumResult<Vec<Box<dyn Effect>>> {
        self.steps
            .iter()
            .map(|step| step.effect(self.root.as_deref()))
            .collect()
    }

    /// Resources for an image base, filling gaps from `defaults`
    pub fn base_spec(&self, defaults: &ResourceSpec) -> ResourceSpec {
        ResourceSpec {
            vcpus: self.base.vcpus.unwrap_or(defaults.vcpus),
            memory_mb: self.base.memory_mb.unwrap_or(defaults.memory_mb),
            disk_size_mb: self.base.disk_size_mb.unwrap_or(defaults.disk_size_mb),
        }
    }

    /// Digest the base chains from, when known without a backend
    pub fn base_digest(&self, defaults: &ResourceSpec) -> Option<String> {
        self.base
            .image
            .as_deref()
            .map(|image| base_image_digest(image, &self.base_spec(defaults)))
    }

    /// Find or create the base snapshot
    ///
    /// An image base reuses any snapshot already created from the same
    /// image and resources.
    pub async fn resolve_base(
        &self,
        registry: &dyn Registry,
        defaults: &ResourceSpec,
    ) -> StratumResult<Snapshot> {
        if let Some(id) = &self.base.snapshot {
            return registry.get_snapshot(id).await;
        }

        let image = self
            .base
            .image
            .as_deref()
            .ok_or_else(|| StratumError::PlanInvalid("[base] has no image".to_string()))?;
        let spec = self.base_spec(defaults);
        let digest = base_image_digest(image, &spec);

        if let Some(existing) = registry
            .list_snapshots_by_digest(&digest)
            .await?
            .into_iter()
            .next()
        {
            debug!("Reusing base snapshot {} for {}", existing.id, image);
            return Ok(existing);
        }

        let metadata: Metadata = [(BASE_IMAGE_KEY, image)].into_iter().collect();
        registry
            .create_snapshot_from_image(image, &spec, &metadata, Some(&digest))
            .await
    }

    /// Identities and digests of every step chained from `parent`
    pub fn preview(&self, parent: &str) -> StratumResult<Vec<StepPreview>> {
        let mut parent = parent.to_string();
        let mut previews = Vec::with_capacity(self.steps.len());

        for effect in self.effects()? {
            let identity = effect.identity();
            let digest = fingerprint(&parent, &identity);
            previews.push(StepPreview {
                describe: effect.describe(),
                identity,
                digest: digest.clone(),
            });
            parent = digest;
        }

        Ok(previews)
    }

    /// Apply every step in order on top of `base`
    pub async fn execute(&self, catalog: &Catalog, base: &Snapshot) -> StratumResult<PlanReport> {
        self.execute_with_progress(catalog, base, &|_, _, _| {}).await
    }

    /// Like [`execute`](Self::execute), calling `progress(index, total, describe)`
    /// before each step
    pub async fn execute_with_progress(
        &self,
        catalog: &Catalog,
        base: &Snapshot,
        progress: &(dyn Fn(usize, usize, &str) + Send + Sync),
    ) -> StratumResult<PlanReport> {
        let effects = self.effects()?;
        let total = effects.len();
        let mut current = base.clone();
        let mut steps = Vec::with_capacity(total);

        for (index, effect) in effects.iter().enumerate() {
            let describe = effect.describe();
            progress(index, total, &describe);
            debug!(
                "Step {}/{}: {} (target {})",
                index + 1,
                total,
                describe,
                EffectCache::target_digest(&current, effect.as_ref())
            );

            let outcome = catalog.apply(&current, effect.as_ref()).await?;
            steps.push(StepOutcome {
                describe,
                digest: outcome.digest,
                snapshot_id: outcome.snapshot.id.clone(),
                cached: outcome.cached,
            });
            current = outcome.snapshot;
        }

        info!(
            "Plan finished: {} steps, {} cached, result {}",
            total,
            steps.iter().filter(|s| s.cached).count(),
            current.id
        );

        Ok(PlanReport {
            base: base.clone(),
            steps,
            snapshot: current,
        })
    }
}
