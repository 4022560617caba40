use crate::management::instance::VERSION_FILE_NAME;
use crate::storage::files;
use anyhow::{bail, Context};
use async_trait::async_trait;
use log::info;
use std::path::{Path, PathBuf};

/// Fills an empty template directory with a server installation.
#[async_trait]
pub trait TemplateProvider: Send + Sync {
    async fn acquire(&self, template_dir: &Path) -> anyhow::Result<()>;
}

/// Copies an already unpacked server installation.
pub struct LocalTemplateProvider {
    source: PathBuf,
    version: Option<String>,
}

impl LocalTemplateProvider {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            version: None,
        }
    }

    /// Writes `version.txt` when the installation does not carry one.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

#[async_trait]
impl TemplateProvider for LocalTemplateProvider {
    async fn acquire(&self, template_dir: &Path) -> anyhow::Result<()> {
        if !self.source.is_dir() {
            bail!("{} is not a directory", self.source.display());
        }

        let source = self.source.clone();
        let target = template_dir.to_path_buf();
        tokio::task::spawn_blocking(move || files::copy_dir_all(source, target))
            .await?
            .with_context(|| format!("failed to copy {}", self.source.display()))?;

        let marker = template_dir.join(VERSION_FILE_NAME);
        if let Some(version) = &self.version {
            if !marker.exists() {
                tokio::fs::write(&marker, format!("{}\n", version)).await?;
            }
        }

        info!(
            "template copied from {} to {}",
            self.source.display(),
            template_dir.display()
        );
        Ok(())
    }
}
