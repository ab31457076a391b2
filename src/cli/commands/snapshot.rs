//! Snapshot command - list, inspect, create and delete snapshots

use crate::cache::short;
use crate::cli::args::{OutputFormat, SnapshotAction, SnapshotArgs};
use crate::config::Config;
use crate::error::StratumResult;
use crate::provider::{create_backend, Registry};
use crate::snapshot::{Metadata, MetadataUpdate, ResourceSpec, Snapshot, SnapshotStatus};
use crate::ui::{self, TaskSpinner, UiContext};
use console::style;

pub async fn execute(args: SnapshotArgs, config: &Config) -> StratumResult<()> {
    let backend = create_backend(config)?;
    let registry = backend.registry.as_ref();

    match args.action {
        SnapshotAction::List { digest, format } => list(registry, digest.as_deref(), format).await,
        SnapshotAction::Show { id } => {
            let snapshot = registry.get_snapshot(&id).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
        SnapshotAction::Create {
            image,
            vcpus,
            memory_mb,
            disk_size_mb,
            digest,
            metadata,
        } => {
            let defaults = config.snapshot.spec();
            let spec = ResourceSpec {
                vcpus: vcpus.unwrap_or(defaults.vcpus),
                memory_mb: memory_mb.unwrap_or(defaults.memory_mb),
                disk_size_mb: disk_size_mb.unwrap_or(defaults.disk_size_mb),
            };
            let metadata: Metadata = metadata.into_iter().collect();
            create(registry, &image, &spec, &metadata, digest.as_deref()).await
        }
        SnapshotAction::Delete { id, yes } => delete(registry, &id, yes).await,
        SnapshotAction::SetMetadata {
            id,
            entries,
            replace,
        } => {
            let entries: Metadata = entries.into_iter().collect();
            let update = if replace {
                MetadataUpdate::Replace(entries)
            } else {
                MetadataUpdate::Merge(entries)
            };
            let snapshot = registry.set_snapshot_metadata(&id, &update).await?;
            let ctx = UiContext::detect();
            ui::step_ok_detail(
                &ctx,
                &format!("Updated metadata of {}", snapshot.id),
                &format!("{} entries", snapshot.metadata.len()),
            );
            Ok(())
        }
    }
}

async fn list(
    registry: &dyn Registry,
    digest: Option<&str>,
    format: OutputFormat,
) -> StratumResult<()> {
    let mut snapshots = match digest {
        Some(digest) => registry.list_snapshots_by_digest(digest).await?,
        None => registry.list_snapshots().await?,
    };
    snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&snapshots)?),
        OutputFormat::Plain => {
            for snapshot in &snapshots {
                println!("{}", snapshot.id);
            }
        }
        OutputFormat::Table => {
            let ctx = UiContext::detect();
            if snapshots.is_empty() {
                ui::step_info(&ctx, &format!("No snapshots in {}", registry.backend_name()));
            } else {
                print_table(&snapshots);
            }
        }
    }
    Ok(())
}

fn print_table(snapshots: &[Snapshot]) {
    println!(
        "{:<24} {:<10} {:<18} {:<14} {}",
        style("ID").bold(),
        style("STATUS").bold(),
        style("CREATED").bold(),
        style("DIGEST").bold(),
        style("IMAGE").bold()
    );
    println!("{}", "-".repeat(90));

    for snapshot in snapshots {
        let status = match snapshot.status {
            SnapshotStatus::Ready => style(snapshot.status.to_string()).green(),
            SnapshotStatus::Pending => style(snapshot.status.to_string()).yellow(),
            SnapshotStatus::Failed => style(snapshot.status.to_string()).red(),
            SnapshotStatus::Deleting | SnapshotStatus::Deleted => {
                style(snapshot.status.to_string()).dim()
            }
        };
        println!(
            "{:<24} {:<10} {:<18} {:<14} {}",
            snapshot.short_id(),
            status,
            snapshot.created_at.format("%Y-%m-%d %H:%M"),
            snapshot.digest.as_deref().map(short).unwrap_or("-"),
            snapshot.image_id
        );
    }
}

async fn create(
    registry: &dyn Registry,
    image: &str,
    spec: &ResourceSpec,
    metadata: &Metadata,
    digest: Option<&str>,
) -> StratumResult<()> {
    let ctx = UiContext::detect();
    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!("Creating snapshot from {}", image));

    match registry
        .create_snapshot_from_image(image, spec, metadata, digest)
        .await
    {
        Ok(snapshot) => {
            spinner.stop(&format!("Created {}", snapshot.id));
            Ok(())
        }
        Err(e) => {
            spinner.stop_error(&format!("Could not create snapshot from {}", image));
            Err(e)
        }
    }
}

async fn delete(registry: &dyn Registry, id: &str, yes: bool) -> StratumResult<()> {
    let ctx = UiContext::detect().with_auto_yes(yes);

    if !ui::confirm(&ctx, &format!("Delete snapshot {}?", id), false).await? {
        ui::step_info(&ctx, "Nothing deleted");
        return Ok(());
    }

    registry.delete_snapshot(id).await?;
    ui::step_ok(&ctx, &format!("Deleted {}", id));
    Ok(())
}
