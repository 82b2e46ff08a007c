use anyhow::{Context, Result};
use releaseforge_common::ArtifactHandle;
use std::path::{Path, PathBuf};

use super::ArtifactPublisher;

/// Copies artifacts into a directory that is served or mounted elsewhere.
///
/// The handle is the public URL when a base URL is configured, otherwise the
/// file name inside the directory.
pub struct DirectoryPublisher {
    root: PathBuf,
    public_base_url: Option<String>,
    name: String,
}

impl DirectoryPublisher {
    pub fn new(root: PathBuf, public_base_url: Option<String>) -> Self {
        let name = format!("dir:{}", root.display());
        Self {
            root,
            public_base_url: public_base_url.map(|u| u.trim_end_matches('/').to_string()),
            name,
        }
    }
}

#[async_trait::async_trait]
impl ArtifactPublisher for DirectoryPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, path: &Path) -> Result<ArtifactHandle> {
        let file_name = path
            .file_name()
            .with_context(|| format!("Artifact path has no file name: {:?}", path))?
            .to_string_lossy()
            .to_string();

        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create {:?}", self.root))?;

        // Copy under a temporary name, then rename, so readers never see a partial file.
        let target = self.root.join(&file_name);
        let partial = self.root.join(format!(".{}.part", file_name));
        tokio::fs::copy(path, &partial)
            .await
            .with_context(|| format!("Failed to copy {:?} into {:?}", path, self.root))?;
        tokio::fs::rename(&partial, &target).await?;

        let handle = match &self.public_base_url {
            Some(base) => format!("{}/{}", base, file_name),
            None => file_name,
        };

        tracing::debug!(publisher = %self.name, handle = %handle, "Published artifact");
        Ok(ArtifactHandle::new(handle))
    }
}
