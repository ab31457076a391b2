//! CLI command implementations

pub mod build;
pub mod config;
pub mod copy;
pub mod fingerprint;
pub mod run;
pub mod snapshot;

pub use build::execute as build;
pub use config::execute as config;
pub use copy::execute as copy;
pub use fingerprint::execute as fingerprint;
pub use run::execute as run;
pub use snapshot::execute as snapshot;

use crate::audit::BuildJournal;
use crate::cache::{short, EffectCache};
use crate::config::Config;
use crate::effect::{Catalog, Effect};
use crate::error::StratumResult;
use crate::provider::create_backend;
use crate::snapshot::Snapshot;
use crate::ui::{self, TaskSpinner, UiContext};

/// Cache engine over the configured backend
fn catalog(config: &Config) -> StratumResult<Catalog> {
    let backend = create_backend(config)?;
    let cache = EffectCache::from_backend(&backend)
        .with_ready_timeout(config.cache.ready_timeout())
        .with_poll_interval(config.cache.poll_interval())
        .with_journal(BuildJournal::new(config));
    Ok(Catalog::new(cache))
}

/// Apply one effect on top of snapshot `base_id` and report the result
async fn apply_single(config: &Config, base_id: &str, effect: &dyn Effect) -> StratumResult<()> {
    let ctx = UiContext::detect();
    let catalog = catalog(config)?;
    let base = catalog.cache().registry().get_snapshot(base_id).await?;

    let describe = effect.describe();
    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&describe);

    let outcome = match catalog.apply(&base, effect).await {
        Ok(outcome) => outcome,
        Err(e) => {
            spinner.stop_error(&describe);
            return Err(e);
        }
    };

    if outcome.cached {
        spinner.stop(&format!("{} (cached)", describe));
    } else {
        spinner.stop(&describe);
    }
    print_result(&ctx, &outcome.snapshot, &outcome.digest);
    Ok(())
}

fn print_result(ctx: &UiContext, snapshot: &Snapshot, digest: &str) {
    ui::key_value(ctx, "snapshot", &snapshot.id);
    ui::key_value(ctx, "digest", short(digest));
}
