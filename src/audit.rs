//! Build journal
//!
//! Writes JSON lines to `~/.local/state/stratum/builds.log` recording every
//! cache hit, build and failure. Journaling never fails a build.

use crate::config::{schema::Config, ConfigManager};
use chrono::Utc;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Event names written by the cache engine
pub mod events {
    pub const CACHE_HIT: &str = "cache.hit";
    pub const CACHE_BUILD: &str = "cache.build";
    pub const CACHE_FAILED: &str = "cache.failed";
}

/// File-based build journal that appends JSON lines
#[derive(Debug, Clone)]
pub struct BuildJournal {
    enabled: bool,
    path: PathBuf,
}

impl BuildJournal {
    /// Create a journal from config
    pub fn new(config: &Config) -> Self {
        Self {
            enabled: config.general.journal,
            path: ConfigManager::journal_path(),
        }
    }

    /// Create an enabled journal writing to `path`
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            path: path.into(),
        }
    }

    /// Journal that drops every event
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            path: PathBuf::new(),
        }
    }

    /// Journal file path
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Log an event as a JSON line
    ///
    /// Drops events on IO failure after a warning.
    pub async fn log(&self, event: &str, data: &serde_json::Value) {
        if !self.enabled {
            return;
        }

        let entry = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "event": event,
            "data": data,
        });

        let mut line = match serde_json::to_string(&entry) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to serialize journal event: {}", e);
                return;
            }
        };
        line.push('\n');

        if let Err(e) = self.append(&line).await {
            warn!("Failed to write build journal: {}", e);
        }
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
