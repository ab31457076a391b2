//! Build command - apply a build plan step by step

use crate::cache::short;
use crate::cli::args::BuildArgs;
use crate::config::Config;
use crate::error::{StratumError, StratumResult};
use crate::plan::BuildPlan;
use crate::ui::{self, PlanProgress, TaskSpinner, UiContext};

pub async fn execute(args: BuildArgs, config: &Config) -> StratumResult<()> {
    let ctx = UiContext::detect();
    let plan = BuildPlan::from_file(&args.plan).await?;

    if args.dry_run {
        return dry_run(&ctx, &plan, config).await;
    }

    ui::intro(&ctx, &format!("Building {}", args.plan.display()));
    let catalog = super::catalog(config)?;

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start("Resolving base snapshot");
    let base = match plan
        .resolve_base(catalog.cache().registry().as_ref(), &config.snapshot.spec())
        .await
    {
        Ok(base) => {
            spinner.stop(&format!("Base snapshot {}", base.id));
            base
        }
        Err(e) => {
            spinner.stop_error("Base snapshot unavailable");
            return Err(e);
        }
    };

    let progress = PlanProgress::new(&ctx, plan.steps.len());
    let result = plan
        .execute_with_progress(&catalog, &base, &|index, total, describe| {
            progress.step(index, total, describe)
        })
        .await;
    progress.finish();
    let report = result?;

    for step in &report.steps {
        if step.cached {
            ui::step_cached(&ctx, &step.describe, &step.snapshot_id);
        } else {
            ui::step_ok_detail(&ctx, &step.describe, &step.snapshot_id);
        }
    }

    if report.steps.is_empty() {
        ui::outro_warn(&ctx, &format!("Plan has no steps, result is {}", report.snapshot.id));
    } else {
        ui::outro_success(
            &ctx,
            &format!(
                "{} ({}/{} steps cached)",
                report.snapshot.id,
                report.cached_count(),
                report.steps.len()
            ),
        );
    }
    Ok(())
}

/// Print every step's digest. Only a snapshot base needs the backend.
async fn dry_run(ctx: &UiContext, plan: &BuildPlan, config: &Config) -> StratumResult<()> {
    let parent = match plan.base_digest(&config.snapshot.spec()) {
        Some(digest) => digest,
        None => {
            let id = plan.base.snapshot.as_deref().ok_or_else(|| {
                StratumError::PlanInvalid("[base] needs a snapshot or an image".to_string())
            })?;
            let catalog = super::catalog(config)?;
            let base = catalog.cache().registry().get_snapshot(id).await?;
            base.chain_parent().to_string()
        }
    };

    ui::intro(ctx, "Dry run");
    ui::key_value(ctx, "base", &parent);
    for (index, step) in plan.preview(&parent)?.iter().enumerate() {
        println!("  {:>2}. {}  {}", index + 1, short(&step.digest), step.describe);
        ui::remark(ctx, &step.identity);
    }
    Ok(())
}
