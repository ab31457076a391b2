//! Effect cache engine
//!
//! Applies an [`Effect`] to a base snapshot, reusing a previously captured
//! snapshot with the same chained digest when one exists.

use crate::audit::{events, BuildJournal};
use crate::cache::fingerprint::{fingerprint, short};
use crate::effect::Effect;
use crate::error::{BuildStage, StratumError, StratumResult};
use crate::provider::{Backend, Instance, Registry, Sandbox};
use crate::snapshot::Snapshot;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default time a fresh instance gets to become ready
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(300);

/// Default interval between readiness polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Result of applying an effect
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    /// Snapshot holding the effect's result
    pub snapshot: Snapshot,
    /// Digest the snapshot was looked up under
    pub digest: String,
    /// True when an existing snapshot was reused
    pub cached: bool,
}

/// Content-addressed build cache over a registry and a sandbox
pub struct EffectCache {
    registry: Arc<dyn Registry>,
    sandbox: Arc<dyn Sandbox>,
    ready_timeout: Duration,
    poll_interval: Duration,
    journal: BuildJournal,
}

impl EffectCache {
    /// Create an engine with default timeouts and no journal
    pub fn new(registry: Arc<dyn Registry>, sandbox: Arc<dyn Sandbox>) -> Self {
        Self {
            registry,
            sandbox,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            journal: BuildJournal::disabled(),
        }
    }

    /// Create an engine over both halves of a backend
    pub fn from_backend(backend: &Backend) -> Self {
        Self::new(backend.registry.clone(), backend.sandbox.clone())
    }

    /// Set how long a fresh instance may take to become ready
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Set the readiness poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Record hits, builds and failures in `journal`
    pub fn with_journal(mut self, journal: BuildJournal) -> Self {
        self.journal = journal;
        self
    }

    /// Registry the engine looks snapshots up in
    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    /// Digest a snapshot produced by applying `effect` to `base` carries
    pub fn target_digest(base: &Snapshot, effect: &dyn Effect) -> String {
        fingerprint(base.chain_parent(), &effect.identity())
    }

    /// Apply `effect` to `base`, returning the resulting snapshot
    ///
    /// Concurrent callers applying the same effect to the same base may both
    /// miss and build; the registry then holds two interchangeable snapshots
    /// with one digest and later lookups return whichever comes first.
    pub async fn apply(&self, base: &Snapshot, effect: &dyn Effect) -> StratumResult<Snapshot> {
        Ok(self.apply_with_outcome(base, effect).await?.snapshot)
    }

    /// Like [`apply`](Self::apply), also reporting whether the cache hit
    pub async fn apply_with_outcome(
        &self,
        base: &Snapshot,
        effect: &dyn Effect,
    ) -> StratumResult<ApplyOutcome> {
        let description = effect.describe();
        let digest = Self::target_digest(base, effect);
        debug!(
            "Looking up {} for '{}' on {}",
            short(&digest),
            description,
            base.id
        );

        let matches = self
            .registry
            .list_snapshots_by_digest(&digest)
            .await
            .map_err(|e| StratumError::build(BuildStage::Lookup, &description, &base.id, e))?;

        if let Some(hit) = matches.into_iter().next() {
            info!("Cache hit for '{}': {}", description, hit.id);
            self.journal
                .log(
                    events::CACHE_HIT,
                    &serde_json::json!({
                        "effect": effect.kind(),
                        "digest": digest,
                        "base": base.id,
                        "snapshot": hit.id,
                    }),
                )
                .await;
            return Ok(ApplyOutcome {
                snapshot: hit,
                digest,
                cached: true,
            });
        }

        info!("Cache miss for '{}', building on {}", description, base.id);
        match self.build(base, effect, &digest, &description).await {
            Ok(snapshot) => {
                info!("Built {} as {}", short(&digest), snapshot.id);
                self.journal
                    .log(
                        events::CACHE_BUILD,
                        &serde_json::json!({
                            "effect": effect.kind(),
                            "digest": digest,
                            "base": base.id,
                            "snapshot": snapshot.id,
                        }),
                    )
                    .await;
                Ok(ApplyOutcome {
                    snapshot,
                    digest,
                    cached: false,
                })
            }
            Err(e) => {
                self.journal
                    .log(
                        events::CACHE_FAILED,
                        &serde_json::json!({
                            "effect": effect.kind(),
                            "digest": digest,
                            "base": base.id,
                            "error": e.to_string(),
                        }),
                    )
                    .await;
                Err(e)
            }
        }
    }

    /// Build on a fresh instance. The instance is stopped on every path.
    async fn build(
        &self,
        base: &Snapshot,
        effect: &dyn Effect,
        digest: &str,
        description: &str,
    ) -> StratumResult<Snapshot> {
        let instance: Arc<dyn Instance> = self
            .sandbox
            .start_from_snapshot(&base.id)
            .await
            .map_err(|e| StratumError::build(BuildStage::Start, description, &base.id, e))?
            .into();
        debug!("Building in instance {}", instance.id());

        let guard = TeardownGuard::new(instance.clone());
        let result = self.run_on(instance.as_ref(), effect, digest).await;
        guard.stop().await;

        result.map_err(|(stage, e)| StratumError::build(stage, description, &base.id, e))
    }

    async fn run_on(
        &self,
        instance: &dyn Instance,
        effect: &dyn Effect,
        digest: &str,
    ) -> Result<Snapshot, (BuildStage, StratumError)> {
        instance
            .wait_until_ready(self.ready_timeout, self.poll_interval)
            .await
            .map_err(|e| (BuildStage::Ready, e))?;

        effect
            .apply(instance)
            .await
            .map_err(|e| (BuildStage::Effect, e))?;

        instance
            .capture_snapshot(Some(digest), None)
            .await
            .map_err(|e| (BuildStage::Capture, e))
    }
}

/// Stops an instance when the build future is dropped before finishing
struct TeardownGuard {
    instance: Arc<dyn Instance>,
    armed: bool,
}

impl TeardownGuard {
    fn new(instance: Arc<dyn Instance>) -> Self {
        Self {
            instance,
            armed: true,
        }
    }

    /// Stop the instance now and disarm the guard
    async fn stop(mut self) {
        self.armed = false;
        stop_logged(self.instance.as_ref()).await;
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let instance = Arc::clone(&self.instance);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Build cancelled, stopping instance {}", instance.id());
                handle.spawn(async move {
                    stop_logged(instance.as_ref()).await;
                });
            }
            Err(_) => warn!(
                "Build cancelled outside a runtime, instance {} left running",
                instance.id()
            ),
        }
    }
}

/// Stop an instance. Failures are logged, never returned.
async fn stop_logged(instance: &dyn Instance) {
    if let Err(e) = instance.stop().await {
        warn!("Failed to stop instance {}: {}", instance.id(), e);
    }
}
