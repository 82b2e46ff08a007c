//! Wires ingestion, the work queue, and the stage executor into one service.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use releaseforge_common::{Error, Identity};
use releaseforge_db::pool::DbPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::feed::FeedProvider;
use crate::ingest::{
    AcceptOutcome, Candidate, DedupStore, Deduplicator, SqliteDedupStore, TitleParser, WorkItem,
};
use crate::pipeline::{Collaborators, ExecutorSettings, ItemOutcome, PipelineExecutor};
use crate::queue::{reconcile, CancelOutcome, QueueSnapshot, WorkQueue};
use crate::state::{PipelineEvent, PipelineState};
use crate::store::ReleaseStore;

/// The release pipeline service.
pub struct Coordinator {
    dedup: Arc<Deduplicator>,
    dedup_store: Arc<dyn DedupStore>,
    queue: Arc<WorkQueue>,
    state: Arc<PipelineState>,
    executor: Arc<PipelineExecutor>,
    store: ReleaseStore,
    poll_interval: Duration,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<ItemOutcome>>>,
}

impl Coordinator {
    pub fn new(config: &Config, pool: DbPool, collaborators: Collaborators) -> Result<Arc<Self>> {
        Self::with_settings(config, ExecutorSettings::from_config(config), pool, collaborators)
    }

    /// Build with explicit executor settings. Tests use this to shorten
    /// backoffs and timeouts.
    pub fn with_settings(
        config: &Config,
        settings: ExecutorSettings,
        pool: DbPool,
        collaborators: Collaborators,
    ) -> Result<Arc<Self>> {
        let dedup_store: Arc<dyn DedupStore> = Arc::new(SqliteDedupStore::new(pool.clone()));
        let parser = TitleParser::new().context("Failed to compile title patterns")?;
        let qualities = settings.profiles.iter().map(|p| p.label.clone()).collect();
        let dedup = Arc::new(Deduplicator::new(dedup_store.clone(), parser, qualities));

        let state = PipelineState::new();
        let queue = WorkQueue::new(&config.dispatcher, state.clone());
        let store = ReleaseStore::new(pool);
        let shutdown = CancellationToken::new();

        let executor = PipelineExecutor::new(
            settings,
            collaborators,
            store.clone(),
            dedup.clone(),
            queue.clone(),
            state.clone(),
            shutdown.clone(),
        );

        Ok(Arc::new(Self {
            dedup,
            dedup_store,
            queue,
            state,
            executor,
            store,
            poll_interval: config.feed.poll_interval(),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }))
    }

    pub fn state(&self) -> &Arc<PipelineState> {
        &self.state
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn store(&self) -> &ReleaseStore {
        &self.store
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop polling, stop admitting, and cancel running items.
    pub fn shutdown(&self) {
        tracing::info!("Shutdown requested");
        self.shutdown.cancel();
    }

    /// Re-admit items left ongoing by a previous run.
    pub fn recover(&self) -> Result<usize> {
        let report = reconcile(self.dedup_store.as_ref(), self.dedup.qualities())?;
        if !report.retired.is_empty() {
            tracing::info!(retired = report.retired.len(), "Retired completed items");
        }

        let mut count = 0;
        for item in report.readmit {
            let identity = item.identity.clone();
            match self.spawn_item(item) {
                Ok(()) => count += 1,
                Err(e) => tracing::warn!(identity = %identity, "Not readmitting item: {}", e),
            }
        }
        Ok(count)
    }

    /// Offer a candidate. Accepted items are queued and their pipeline spawned.
    ///
    /// A forced offer of an episode whose pipeline is still waiting or running
    /// is a [`AcceptOutcome::DuplicateActive`], never a second run.
    pub fn submit(&self, candidate: &Candidate, force: bool) -> Result<AcceptOutcome> {
        let outcome = self
            .dedup
            .accept_unless_active(candidate, force, |id| self.queue.contains(id))?;
        self.admit(candidate, outcome)
    }

    /// Offer a feed entry from the blocking pool, retrying database errors
    /// and alerting the operator once they persist.
    async fn offer(&self, candidate: &Candidate) -> Result<AcceptOutcome> {
        let retry = self.executor.settings().persistence_retry;
        let outcome = retry
            .run_while(
                "accept candidate",
                |_| {
                    let candidate = candidate.clone();
                    let queue = self.queue.clone();
                    self.dedup.blocking(move |dedup| {
                        dedup.accept_unless_active(&candidate, false, |id| queue.contains(id))
                    })
                },
                Error::is_database,
            )
            .await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) if e.is_database() => {
                self.executor
                    .alert(&format!(
                        "Persistence failure while accepting {}: {}",
                        candidate.title, e
                    ))
                    .await;
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        self.admit(candidate, outcome)
    }

    fn admit(&self, candidate: &Candidate, outcome: AcceptOutcome) -> Result<AcceptOutcome> {
        match &outcome {
            AcceptOutcome::Accepted(item) => match self.spawn_item(item.clone()) {
                Ok(()) => self.state.broadcast(PipelineEvent::ItemAccepted {
                    identity: item.identity.clone(),
                    title: item.title.clone(),
                }),
                Err(Error::Conflict(reason)) => {
                    // A concurrent offer queued the same episode first.
                    tracing::info!(identity = %item.identity, "{}", reason);
                    return Ok(AcceptOutcome::DuplicateActive);
                }
                Err(e) => return Err(e.into()),
            },
            other => {
                tracing::debug!(title = %candidate.title, outcome = ?other, "Candidate not accepted");
            }
        }

        Ok(outcome)
    }

    fn spawn_item(&self, item: WorkItem) -> releaseforge_common::Result<()> {
        let admission = self.queue.enqueue(&item.identity)?;

        let executor = self.executor.clone();
        let handle = tokio::spawn(async move { executor.run(item, admission).await });

        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
        Ok(())
    }

    /// Cancel a waiting or running item.
    pub fn cancel(&self, identity: &Identity) -> CancelOutcome {
        self.queue.cancel(identity)
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.queue.snapshot()
    }

    /// Poll `feed` once and submit every entry.
    ///
    /// Returns the number of accepted candidates.
    pub async fn poll_once(&self, feed: &dyn FeedProvider) -> Result<usize> {
        let candidates = feed.poll().await?;
        let mut accepted = 0;

        for candidate in &candidates {
            match self.offer(candidate).await {
                Ok(AcceptOutcome::Accepted(_)) => accepted += 1,
                Ok(_) => {}
                Err(e) => match e.downcast_ref::<Error>() {
                    Some(Error::InvalidInput(_)) => {
                        tracing::warn!(title = %candidate.title, "Skipping unrecognized title")
                    }
                    _ => tracing::error!(title = %candidate.title, "Failed to submit candidate: {:#}", e),
                },
            }
        }

        tracing::debug!(entries = candidates.len(), accepted, "Feed poll finished");
        Ok(accepted)
    }

    /// Start the dispatcher on its own task.
    pub fn start_dispatcher(&self) -> JoinHandle<()> {
        tokio::spawn(self.queue.clone().run_dispatcher(self.shutdown.clone()))
    }

    /// Run until shutdown: recover, dispatch, and poll `feed` on its interval.
    pub async fn run(self: Arc<Self>, feed: Arc<dyn FeedProvider>) -> Result<()> {
        let recovered = self.recover()?;
        tracing::info!(recovered, "Coordinator started");

        let dispatcher = self.start_dispatcher();

        loop {
            if let Err(e) = self.poll_once(feed.as_ref()).await {
                tracing::warn!("Feed poll failed: {:#}", e);
            }

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        let outcomes = self.wait_idle().await;
        let _ = dispatcher.await;
        tracing::info!(items = outcomes.len(), "Coordinator stopped");
        Ok(())
    }

    /// Wait for every spawned item pipeline to finish.
    pub async fn wait_idle(&self) -> Vec<ItemOutcome> {
        let handles: Vec<_> = std::mem::take(&mut *self.tasks.lock());

        let mut outcomes = Vec::with_capacity(handles.len());
        for result in futures::future::join_all(handles).await {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::error!("Item task failed: {}", e),
            }
        }
        outcomes
    }
}
