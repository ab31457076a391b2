//! File copy effect

use crate::effect::Effect;
use crate::error::{StratumError, StratumResult};
use crate::provider::{Instance, SyncOptions};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Copy a local file or directory into the instance
///
/// The identity covers the paths and options, not the file contents:
/// changing a copied file without renaming it reuses the old snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyFiles {
    pub src: PathBuf,
    pub dest: String,
    pub options: SyncOptions,
    /// Directory a relative `src` is resolved against
    root: Option<PathBuf>,
}

impl CopyFiles {
    pub fn new(src: impl Into<PathBuf>, dest: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            dest: dest.into(),
            options: SyncOptions::default(),
            root: None,
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Resolve a relative `src` against `root` without changing the identity
    pub fn relative_to(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Local path that will be transferred
    pub fn local_path(&self) -> PathBuf {
        match &self.root {
            Some(root) if self.src.is_relative() => root.join(&self.src),
            _ => self.src.clone(),
        }
    }
}

#[async_trait]
impl Effect for CopyFiles {
    fn kind(&self) -> &'static str {
        "copy"
    }

    fn identity(&self) -> String {
        let identity = serde_json::json!({
            "src": self.src.to_string_lossy(),
            "dest": self.dest,
            "delete": self.options.delete,
            "exclude": self.options.exclude,
        });
        format!("copy:{}", identity)
    }

    fn describe(&self) -> String {
        format!("copy {} -> {}", self.src.display(), self.dest)
    }

    async fn apply(&self, instance: &dyn Instance) -> StratumResult<()> {
        let local = self.local_path();
        ensure_exists(&local)?;
        instance.sync_files(&local, &self.dest, &self.options).await
    }
}

fn ensure_exists(path: &Path) -> StratumResult<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(StratumError::PathNotFound(path.to_path_buf()))
    }
}
