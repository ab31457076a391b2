//! Cached effect operations
//!
//! Each operation builds its effect and routes it through the cache engine.

use crate::cache::{ApplyOutcome, EffectCache};
use crate::effect::{
    Check, ConfigureContainer, ContainerOptions, CopyFiles, Effect, RunCommand, Verify,
};
use crate::error::StratumResult;
use crate::provider::SyncOptions;
use crate::snapshot::Snapshot;
use std::path::PathBuf;

/// Effect operations over an [`EffectCache`]
pub struct Catalog {
    cache: EffectCache,
}

impl Catalog {
    pub fn new(cache: EffectCache) -> Self {
        Self { cache }
    }

    /// Underlying cache engine
    pub fn cache(&self) -> &EffectCache {
        &self.cache
    }

    /// Apply any effect, reporting whether the cache hit
    pub async fn apply(&self, base: &Snapshot, effect: &dyn Effect) -> StratumResult<ApplyOutcome> {
        self.cache.apply_with_outcome(base, effect).await
    }

    /// Run a shell command on top of `base`
    pub async fn run(
        &self,
        base: &Snapshot,
        command: impl Into<RunCommand>,
    ) -> StratumResult<Snapshot> {
        let effect = command.into();
        self.cache.apply(base, &effect).await
    }

    /// Copy a local path into the snapshot at `dest`
    pub async fn copy(
        &self,
        base: &Snapshot,
        src: impl Into<PathBuf>,
        dest: &str,
        options: SyncOptions,
    ) -> StratumResult<Snapshot> {
        let effect = CopyFiles::new(src, dest).with_options(options);
        self.cache.apply(base, &effect).await
    }

    /// Run a container and make it the instance's login environment
    pub async fn configure_container(
        &self,
        base: &Snapshot,
        options: ContainerOptions,
    ) -> StratumResult<Snapshot> {
        let effect = ConfigureContainer::new(options);
        self.cache.apply(base, &effect).await
    }

    /// Run checks; the snapshot is only produced when all of them pass
    pub async fn verify(
        &self,
        base: &Snapshot,
        instructions: &str,
        checks: Vec<Box<dyn Check>>,
    ) -> StratumResult<Snapshot> {
        let effect = Verify::new(instructions, checks);
        self.cache.apply(base, &effect).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fingerprint;
    use crate::effect::CommandCheck;
    use crate::error::ErrorKind;
    use crate::provider::fake::FakeBackend;
    use std::sync::Arc;

    fn catalog(backend: &FakeBackend) -> Catalog {
        Catalog::new(EffectCache::new(
            Arc::new(backend.clone()),
            Arc::new(backend.clone()),
        ))
    }

    #[tokio::test]
    async fn first_run_builds_with_expected_digest() {
        let backend = FakeBackend::new();
        let base = backend.seed_snapshot("snap_1", None);

        let s1 = catalog(&backend).run(&base, "apt-get update").await.unwrap();

        // printf 'snap_1\0run:["apt-get update",false,true]' | sha256sum
        assert_eq!(
            s1.digest.as_deref(),
            Some("f4772ca45ccf79048935aa94851af134521181023bde339ddfc863580b96886e")
        );
        assert_eq!(backend.count("start"), 1);
        assert_eq!(backend.count("capture"), 1);
    }

    #[tokio::test]
    async fn repeated_run_hits() {
        let backend = FakeBackend::new();
        let base = backend.seed_snapshot("snap_1", None);
        let catalog = catalog(&backend);

        let s1 = catalog.run(&base, "apt-get update").await.unwrap();
        let again = catalog.run(&base, "apt-get update").await.unwrap();

        assert_eq!(again.id, s1.id);
        assert_eq!(backend.count("start"), 1);
    }

    #[tokio::test]
    async fn chained_run_keys_on_parent_digest() {
        let backend = FakeBackend::new();
        let base = backend.seed_snapshot("snap_1", None);
        let catalog = catalog(&backend);

        let s1 = catalog.run(&base, "apt-get update").await.unwrap();
        let s2 = catalog.run(&s1, "apt-get install -y curl").await.unwrap();

        let d1 = s1.digest.clone().unwrap();
        let d2 = s2.digest.clone().unwrap();
        assert_ne!(d1, d2);
        assert_eq!(
            d2,
            fingerprint(&d1, &RunCommand::new("apt-get install -y curl").identity())
        );
        assert_ne!(
            d2,
            fingerprint("snap_1", &RunCommand::new("apt-get install -y curl").identity())
        );
    }

    #[tokio::test]
    async fn failed_verify_never_captures() {
        let backend = FakeBackend::new();
        backend.fail_command("systemctl is-active web");
        let base = backend.seed_snapshot("snap_1", None);

        let err = catalog(&backend)
            .verify(
                &base,
                "web service active",
                vec![Box::new(CommandCheck::new(
                    "web",
                    "systemctl is-active web",
                ))],
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::EffectExecution);
        assert_eq!(backend.count("capture"), 0);
        assert_eq!(backend.count("stop"), 1);
    }

    #[tokio::test]
    async fn shared_custom_digest_resolves_hit() {
        let backend = FakeBackend::new();
        let a = backend.seed_snapshot("snap_a", Some("golden"));
        let b = backend.seed_snapshot("snap_b", Some("golden"));
        let catalog = catalog(&backend);

        let from_a = catalog.run(&a, "make").await.unwrap();
        let from_b = catalog.run(&b, "make").await.unwrap();

        assert_eq!(from_a.id, from_b.id);
        assert_eq!(backend.count("start"), 1);
        assert!(backend.events().contains(&"start:snap_a".to_string()));
    }

    #[tokio::test]
    async fn copy_and_container_route_through_cache() {
        let dir = tempfile::TempDir::new().unwrap();
        let backend = FakeBackend::new();
        let base = backend.seed_snapshot("snap_1", None);
        let catalog = catalog(&backend);

        let copied = catalog
            .copy(&base, dir.path(), "/srv/app", SyncOptions::default())
            .await
            .unwrap();
        let configured = catalog
            .configure_container(&copied, ContainerOptions::new("nginx:1.27"))
            .await
            .unwrap();

        assert_eq!(backend.synced().len(), 1);
        assert_ne!(copied.digest, configured.digest);
        assert_eq!(backend.count("start"), 2);
    }
}
