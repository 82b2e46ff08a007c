//! Feed providers supplying candidate episodes.

mod rss;

pub use rss::RssFeedProvider;

use anyhow::Result;

use crate::ingest::Candidate;

/// Source of candidate work items.
#[async_trait::async_trait]
pub trait FeedProvider: Send + Sync {
    /// Fetch the current entries of the feed.
    async fn poll(&self) -> Result<Vec<Candidate>>;
}

/// A fixed list of candidates. Used for manual runs.
pub struct StaticFeed {
    candidates: Vec<Candidate>,
}

impl StaticFeed {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self { candidates }
    }
}

#[async_trait::async_trait]
impl FeedProvider for StaticFeed {
    async fn poll(&self) -> Result<Vec<Candidate>> {
        Ok(self.candidates.clone())
    }
}
