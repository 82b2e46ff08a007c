//! Source downloaders.

mod http;

pub use http::HttpDownloader;

use anyhow::Result;
use std::path::{Path, PathBuf};

/// Fetches the source artifact of a work item.
#[async_trait::async_trait]
pub trait Downloader: Send + Sync {
    /// Download `locator` into `destination` and return the written path.
    async fn download(&self, locator: &str, destination: &Path) -> Result<PathBuf>;
}

/// Copies local files. Lets `run` process a file already on disk.
pub struct LocalFileDownloader;

#[async_trait::async_trait]
impl Downloader for LocalFileDownloader {
    async fn download(&self, locator: &str, destination: &Path) -> Result<PathBuf> {
        let source = locator.strip_prefix("file://").unwrap_or(locator);
        tokio::fs::copy(source, destination).await?;
        Ok(destination.to_path_buf())
    }
}

/// Picks the HTTP or local downloader by locator scheme.
pub struct SchemeDownloader {
    http: HttpDownloader,
    local: LocalFileDownloader,
}

impl SchemeDownloader {
    pub fn new() -> Self {
        Self {
            http: HttpDownloader::new(),
            local: LocalFileDownloader,
        }
    }
}

impl Default for SchemeDownloader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Downloader for SchemeDownloader {
    async fn download(&self, locator: &str, destination: &Path) -> Result<PathBuf> {
        if locator.starts_with("http://") || locator.starts_with("https://") {
            self.http.download(locator, destination).await
        } else if locator.starts_with("magnet:") {
            anyhow::bail!("Magnet links are not supported: {}", locator)
        } else {
            self.local.download(locator, destination).await
        }
    }
}
