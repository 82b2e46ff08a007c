//! Ingestion deduplicator.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use releaseforge_common::{Error, Identity, QualityLabel, Result};
use releaseforge_db::models::OngoingItem;
use std::sync::Arc;

use super::store::DedupStore;
use super::title::TitleParser;

/// A feed entry offered for processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub title: String,
    pub source_locator: String,
}

impl Candidate {
    pub fn new(title: impl Into<String>, source_locator: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            source_locator: source_locator.into(),
        }
    }
}

/// An accepted episode travelling through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub identity: Identity,
    pub title: String,
    pub source_locator: String,
    pub ingested_at: DateTime<Utc>,
}

impl From<OngoingItem> for WorkItem {
    fn from(item: OngoingItem) -> Self {
        Self {
            identity: item.identity,
            title: item.title,
            source_locator: item.source_locator,
            ingested_at: item.ingested_at,
        }
    }
}

impl From<&WorkItem> for OngoingItem {
    fn from(item: &WorkItem) -> Self {
        Self {
            identity: item.identity.clone(),
            title: item.title.clone(),
            source_locator: item.source_locator.clone(),
            ingested_at: item.ingested_at,
        }
    }
}

/// Result of offering a candidate to the deduplicator.
#[derive(Debug, Clone, PartialEq)]
pub enum AcceptOutcome {
    Accepted(WorkItem),
    /// The episode is already in the pipeline.
    DuplicateActive,
    /// Every requested quality is already uploaded.
    DuplicateCompleted,
    /// A previous run failed; only a forced ingestion retries it.
    DuplicateFailed,
}

/// Accepts or rejects candidates against the ongoing set and release records.
pub struct Deduplicator {
    store: Arc<dyn DedupStore>,
    parser: TitleParser,
    qualities: Vec<QualityLabel>,
    lock: Mutex<()>,
}

impl Deduplicator {
    pub fn new(store: Arc<dyn DedupStore>, parser: TitleParser, qualities: Vec<QualityLabel>) -> Self {
        Self {
            store,
            parser,
            qualities,
            lock: Mutex::new(()),
        }
    }

    /// Qualities every accepted item is processed for.
    pub fn qualities(&self) -> &[QualityLabel] {
        &self.qualities
    }

    /// Compute the identity of `candidate`.
    pub fn identify(&self, candidate: &Candidate) -> Result<Identity> {
        self.parser
            .parse(&candidate.title)
            .map(|parsed| parsed.identity())
            .ok_or_else(|| {
                Error::invalid_input(format!("Unrecognized episode title: {}", candidate.title))
            })
    }

    /// Offer `candidate` for processing.
    ///
    /// The membership check and the insert into the ongoing set happen under
    /// one lock, so two concurrent offers of the same episode accept once.
    /// `force` bypasses the ongoing check and clears failure marks, but never
    /// re-processes an episode whose requested qualities are all uploaded.
    pub fn accept(&self, candidate: &Candidate, force: bool) -> Result<AcceptOutcome> {
        self.accept_unless_active(candidate, force, |_| false)
    }

    /// Like [`accept`](Self::accept), but `active` reports identities that
    /// still have a live pipeline.
    ///
    /// An ongoing identity for which `active` holds is a duplicate even when
    /// forced. `force` only re-admits ongoing entries nothing is working on,
    /// such as leftovers of an interrupted run.
    pub fn accept_unless_active<F>(
        &self,
        candidate: &Candidate,
        force: bool,
        active: F,
    ) -> Result<AcceptOutcome>
    where
        F: Fn(&Identity) -> bool,
    {
        let identity = self.identify(candidate)?;

        let _guard = self.lock.lock();

        if self.store.is_ongoing(&identity)? && (!force || active(&identity)) {
            tracing::debug!(identity = %identity, force, "Candidate already in progress");
            return Ok(AcceptOutcome::DuplicateActive);
        }

        let record = self.store.release(&identity)?;
        if record
            .as_ref()
            .is_some_and(|r| r.all_uploaded(&self.qualities))
        {
            tracing::debug!(identity = %identity, "Candidate already released");
            return Ok(AcceptOutcome::DuplicateCompleted);
        }

        if force {
            let cleared = self.store.clear_failures(&identity)?;
            if cleared > 0 {
                tracing::info!(identity = %identity, cleared, "Cleared failure marks for forced run");
            }
        } else {
            let failed = self.store.failures(&identity)?.into_iter().any(|failure| {
                self.qualities.contains(&failure.quality)
                    && !record
                        .as_ref()
                        .is_some_and(|r| r.is_uploaded(&failure.quality))
            });
            if failed {
                tracing::debug!(identity = %identity, "Candidate failed previously");
                return Ok(AcceptOutcome::DuplicateFailed);
            }
        }

        let item = WorkItem {
            identity,
            title: candidate.title.clone(),
            source_locator: candidate.source_locator.clone(),
            ingested_at: Utc::now(),
        };
        self.store.insert_ongoing(&OngoingItem::from(&item))?;

        tracing::info!(identity = %item.identity, title = %item.title, "Accepted candidate");
        Ok(AcceptOutcome::Accepted(item))
    }

    /// Remove `identity` from the ongoing set after terminal success.
    pub fn complete(&self, identity: &Identity) -> Result<bool> {
        let _guard = self.lock.lock();
        self.store.remove_ongoing(identity)
    }

    /// Remove `identity` from the ongoing set after terminal failure.
    pub fn abandon(&self, identity: &Identity, reason: &str) -> Result<bool> {
        let _guard = self.lock.lock();
        tracing::warn!(identity = %identity, reason, "Abandoning item");
        self.store.remove_ongoing(identity)
    }

    /// Run `op` against this deduplicator on the blocking pool.
    pub async fn blocking<T, F>(self: &Arc<Self>, op: F) -> Result<T>
    where
        F: FnOnce(&Deduplicator) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let dedup = Arc::clone(self);
        tokio::task::spawn_blocking(move || op(&dedup))
            .await
            .map_err(|e| Error::internal(format!("Dedup task failed: {}", e)))?
    }

    /// Items currently in the ongoing set, oldest first.
    pub fn ongoing(&self) -> Result<Vec<WorkItem>> {
        Ok(self
            .store
            .list_ongoing()?
            .into_iter()
            .map(WorkItem::from)
            .collect())
    }
}
