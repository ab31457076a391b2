//! Snapshot record persistence for the podman backend
//!
//! Podman image labels cannot be edited after commit, so snapshot records
//! (digest, metadata, spec) live in JSON files next to the images.

use crate::error::{StratumError, StratumResult};
use crate::provider::validate_id;
use crate::snapshot::Snapshot;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

/// A snapshot plus the local image it can be started from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    #[serde(flatten)]
    pub snapshot: Snapshot,

    /// Image reference passed to `podman run`
    pub runnable_image: String,
}

/// Directory of `<snapshot id>.json` records
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Create a store rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the records
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &str) -> StratumResult<PathBuf> {
        validate_id("snapshot", id)?;
        Ok(self.dir.join(format!("{}.json", id)))
    }

    /// Load a record by snapshot id
    pub async fn load(&self, id: &str) -> StratumResult<Option<SnapshotRecord>> {
        let path = self.record_path(id)?;

        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await.map_err(|e| {
            StratumError::io(format!("reading snapshot record {}", path.display()), e)
        })?;

        let record: SnapshotRecord = serde_json::from_str(&content)?;
        Ok(Some(record))
    }

    /// Write a record, replacing any previous version
    pub async fn save(&self, record: &SnapshotRecord) -> StratumResult<()> {
        let path = self.record_path(&record.snapshot.id)?;

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StratumError::io("creating snapshot record directory", e))?;

        // Readers only ever see a complete record: write aside, then rename over
        let content = serde_json::to_string_pretty(record)?;
        let staging = self
            .dir
            .join(format!(".{}.{}.tmp", record.snapshot.id, Uuid::new_v4().simple()));
        fs::write(&staging, content).await.map_err(|e| {
            StratumError::io(format!("writing snapshot record {}", staging.display()), e)
        })?;

        if let Err(e) = fs::rename(&staging, &path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(StratumError::io(
                format!("replacing snapshot record {}", path.display()),
                e,
            ));
        }

        Ok(())
    }

    /// Delete a record; missing records are not an error
    pub async fn delete(&self, id: &str) -> StratumResult<()> {
        let path = self.record_path(id)?;
        if path.exists() {
            fs::remove_file(&path).await.map_err(|e| {
                StratumError::io(format!("deleting snapshot record {}", path.display()), e)
            })?;
        }
        Ok(())
    }

    /// List all records, newest first. Unreadable files are skipped.
    pub async fn list_all(&self) -> StratumResult<Vec<SnapshotRecord>> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }

        let mut records = vec![];
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| StratumError::io("reading snapshot record directory", e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StratumError::io("reading snapshot record entry", e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let content = fs::read_to_string(&path).await.ok();
                if let Some(content) = content {
                    if let Ok(record) = serde_json::from_str::<SnapshotRecord>(&content) {
                        records.push(record);
                    }
                }
            }
        }

        records.sort_by(|a, b| b.snapshot.created_at.cmp(&a.snapshot.created_at));

        Ok(records)
    }

    /// Records whose snapshot digest equals `digest`
    pub async fn find_by_digest(&self, digest: &str) -> StratumResult<Vec<SnapshotRecord>> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .filter(|r| r.snapshot.digest.as_deref() == Some(digest))
            .collect())
    }
}
