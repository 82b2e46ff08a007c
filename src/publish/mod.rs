//! Artifact publishers.
//!
//! The primary publisher's handle is what the release record references.
//! Backups are mirrors; their failures are logged and otherwise ignored.

mod directory;

pub use directory::DirectoryPublisher;

use anyhow::Result;
use releaseforge_common::ArtifactHandle;
use std::path::Path;
use std::sync::Arc;

/// Publishes an encoded artifact and returns a stable handle to it.
#[async_trait::async_trait]
pub trait ArtifactPublisher: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn publish(&self, path: &Path) -> Result<ArtifactHandle>;
}

/// A primary publisher plus best-effort backups.
#[derive(Clone)]
pub struct PublisherSet {
    primary: Arc<dyn ArtifactPublisher>,
    backups: Vec<Arc<dyn ArtifactPublisher>>,
}

impl PublisherSet {
    pub fn new(primary: Arc<dyn ArtifactPublisher>) -> Self {
        Self {
            primary,
            backups: Vec::new(),
        }
    }

    pub fn with_backup(mut self, backup: Arc<dyn ArtifactPublisher>) -> Self {
        self.backups.push(backup);
        self
    }

    /// Publish to the primary, then mirror to each backup.
    ///
    /// Only a primary failure is an error.
    pub async fn publish(&self, path: &Path) -> Result<ArtifactHandle> {
        let handle = self.primary.publish(path).await?;

        for backup in &self.backups {
            if let Err(e) = backup.publish(path).await {
                tracing::warn!(
                    publisher = backup.name(),
                    path = %path.display(),
                    "Backup publish failed: {:#}",
                    e
                );
            }
        }

        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    #[async_trait::async_trait]
    impl ArtifactPublisher for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn publish(&self, _path: &Path) -> Result<ArtifactHandle> {
            anyhow::bail!("mirror offline")
        }
    }

    #[tokio::test]
    async fn test_backup_failure_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("ep.mkv");
        std::fs::write(&file, b"data").unwrap();

        let primary = DirectoryPublisher::new(dir.path().join("public"), None);
        let set = PublisherSet::new(Arc::new(primary)).with_backup(Arc::new(Failing));

        let handle = set.publish(&file).await.unwrap();
        assert_eq!(handle.as_str(), "ep.mkv");
    }

    #[tokio::test]
    async fn test_primary_failure_is_error() {
        let set = PublisherSet::new(Arc::new(Failing));
        assert!(set.publish(Path::new("/tmp/nothing.mkv")).await.is_err());
    }
}
