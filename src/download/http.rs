use anyhow::{Context, Result};
use futures::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use super::Downloader;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Streams an HTTP(S) resource into a file.
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client: {}", e);
                Client::new()
            });

        Self { client }
    }
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, locator: &str, destination: &Path) -> Result<PathBuf> {
        let response = self
            .client
            .get(locator)
            .send()
            .await
            .with_context(|| format!("Failed to GET {}", locator))?;

        if !response.status().is_success() {
            anyhow::bail!("Download of {} failed with {}", locator, response.status());
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::File::create(destination)
            .await
            .with_context(|| format!("Failed to create {:?}", destination))?;

        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.with_context(|| format!("Download of {} interrupted", locator))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        tracing::debug!(locator, bytes = written, "Download finished");
        Ok(destination.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_download_writes_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ep5.mkv"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested").join("ep5.mkv");
        let written = HttpDownloader::new()
            .download(&format!("{}/ep5.mkv", server.uri()), &dest)
            .await
            .unwrap();

        assert_eq!(written, dest);
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), 4096);
    }

    #[tokio::test]
    async fn test_download_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let result = HttpDownloader::new()
            .download(&format!("{}/ep5.mkv", server.uri()), &dir.path().join("x"))
            .await;
        assert!(result.is_err());
    }
}
