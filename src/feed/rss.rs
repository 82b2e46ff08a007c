use anyhow::{Context, Result};
use regex::Regex;
use reqwest::Client;
use std::time::Duration;

use super::FeedProvider;
use crate::ingest::Candidate;

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// RSS 2.0 feed reader.
///
/// Entries are pulled out with a handful of patterns rather than a full XML
/// parser; torrent and anime feeds only use `<title>`, `<link>`, and
/// `<enclosure>`.
pub struct RssFeedProvider {
    client: Client,
    urls: Vec<String>,
    item: Regex,
    title: Regex,
    link: Regex,
    enclosure: Regex,
}

impl RssFeedProvider {
    pub fn new(urls: Vec<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(CONNECTION_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client with timeout: {}", e);
                Client::new()
            });

        Ok(Self {
            client,
            urls,
            item: Regex::new(r"(?s)<item\b[^>]*>(.*?)</item>")?,
            title: Regex::new(r"(?s)<title\b[^>]*>(.*?)</title>")?,
            link: Regex::new(r"(?s)<link\b[^>]*>(.*?)</link>")?,
            enclosure: Regex::new(r#"<enclosure\b[^>]*\burl\s*=\s*["']([^"']+)["']"#)?,
        })
    }

    /// Extract candidates from an RSS document.
    pub fn parse(&self, body: &str) -> Vec<Candidate> {
        self.item
            .captures_iter(body)
            .filter_map(|item| {
                let item = item.get(1)?.as_str();
                let title = self.title.captures(item).map(|c| text(&c[1]))?;
                let locator = self
                    .enclosure
                    .captures(item)
                    .map(|c| unescape(&c[1]))
                    .or_else(|| self.link.captures(item).map(|c| text(&c[1])))?;

                if title.is_empty() || locator.is_empty() {
                    return None;
                }
                Some(Candidate::new(title, locator))
            })
            .collect()
    }

    async fn fetch(&self, url: &str) -> Result<Vec<Candidate>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch feed {}", url))?;

        if !response.status().is_success() {
            anyhow::bail!("Feed {} returned {}", url, response.status());
        }

        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read feed {}", url))?;

        Ok(self.parse(&body))
    }
}

#[async_trait::async_trait]
impl FeedProvider for RssFeedProvider {
    async fn poll(&self) -> Result<Vec<Candidate>> {
        let mut candidates = Vec::new();
        let mut last_error = None;

        for url in &self.urls {
            match self.fetch(url).await {
                Ok(mut entries) => {
                    tracing::debug!(url = %url, entries = entries.len(), "Polled feed");
                    candidates.append(&mut entries);
                }
                Err(e) => {
                    tracing::warn!(url = %url, "Feed poll failed: {:#}", e);
                    last_error = Some(e);
                }
            }
        }

        // Only fail the poll when every feed failed.
        match last_error {
            Some(e) if candidates.is_empty() => Err(e),
            _ => Ok(candidates),
        }
    }
}

fn text(raw: &str) -> String {
    let raw = raw.trim();
    let inner = raw
        .strip_prefix("<![CDATA[")
        .and_then(|s| s.strip_suffix("]]>"))
        .map(str::to_string)
        .unwrap_or_else(|| unescape(raw));
    inner.trim().to_string()
}

fn unescape(raw: &str) -> String {
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
