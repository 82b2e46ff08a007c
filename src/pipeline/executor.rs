//! Stage executor: download once, then transcode, publish, record, and notify
//! each configured quality in order.

use releaseforge_common::{ArtifactHandle, Error, Identity, PublishPostHandle, QualityLabel, QualityState};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;

use super::progress;
use super::retry::RetryPolicy;
use crate::config::{Config, QualityProfile};
use crate::download::Downloader;
use crate::ingest::{Deduplicator, WorkItem};
use crate::notifications::{NotificationChannel, ReleaseAnnouncement};
use crate::publish::PublisherSet;
use crate::queue::{Admission, GateSignal, WorkQueue};
use crate::state::{PipelineEvent, PipelineState};
use crate::store::ReleaseStore;
use crate::transcode::{ProgressCallback, TranscodeProgress, Transcoder};

/// Failure of one stage for one item or quality.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// I/O that kept failing after local retries.
    #[error("{stage} failed: {message}")]
    TransientIo { stage: &'static str, message: String },

    /// A stage that cannot succeed by retrying.
    #[error("{stage} failed: {message}")]
    Logic { stage: &'static str, message: String },

    /// The release store could not be written.
    #[error("persistence failed: {0}")]
    Persistence(#[from] Error),

    #[error("cancelled")]
    Cancelled,

    #[error("{stage} timed out after {after:?}")]
    TimedOut { stage: &'static str, after: Duration },
}

impl StageError {
    fn logic(stage: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Logic {
            stage,
            message: err.to_string(),
        }
    }
}

/// How a work item ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    /// Every configured quality is uploaded.
    Completed { uploaded: Vec<QualityLabel> },
    /// At least one quality failed. Uploaded qualities stay recorded.
    Failed {
        uploaded: Vec<QualityLabel>,
        failed: Vec<QualityLabel>,
        error: String,
    },
    /// An operator cancelled the item.
    Cancelled,
    /// Shutdown stopped the item; it stays ongoing and is readmitted on restart.
    Interrupted,
}

/// Per-run settings of the executor.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Qualities to produce, in order.
    pub profiles: Vec<QualityProfile>,
    pub download_dir: PathBuf,
    pub encode_dir: PathBuf,
    pub download_retry: RetryPolicy,
    pub persistence_retry: RetryPolicy,
    pub download_timeout: Duration,
    pub transcode_timeout: Duration,
    pub publish_timeout: Duration,
    pub max_concurrent_downloads: usize,
    pub max_concurrent_publishes: usize,
    /// Remove encoded artifacts after they are published.
    pub auto_delete: bool,
}

impl ExecutorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            profiles: config.qualities.clone(),
            download_dir: config.paths.download_dir.clone(),
            encode_dir: config.paths.encode_dir.clone(),
            download_retry: config.retry.download.into(),
            persistence_retry: config.retry.persistence.into(),
            download_timeout: config.timeouts.download(),
            transcode_timeout: config.timeouts.transcode(),
            publish_timeout: config.timeouts.publish(),
            max_concurrent_downloads: config.limits.max_concurrent_downloads,
            max_concurrent_publishes: config.limits.max_concurrent_publishes,
            auto_delete: config.auto_delete,
        }
    }
}

/// External systems the executor drives.
#[derive(Clone)]
pub struct Collaborators {
    pub downloader: Arc<dyn Downloader>,
    pub transcoder: Arc<dyn Transcoder>,
    pub publishers: PublisherSet,
    pub notifier: Arc<dyn NotificationChannel>,
}

/// Runs admitted work items through their stages.
pub struct PipelineExecutor {
    settings: ExecutorSettings,
    collaborators: Collaborators,
    store: ReleaseStore,
    dedup: Arc<Deduplicator>,
    queue: Arc<WorkQueue>,
    state: Arc<PipelineState>,
    download_permits: Semaphore,
    publish_permits: Semaphore,
    shutdown: CancellationToken,
}

impl PipelineExecutor {
    pub fn new(
        settings: ExecutorSettings,
        collaborators: Collaborators,
        store: ReleaseStore,
        dedup: Arc<Deduplicator>,
        queue: Arc<WorkQueue>,
        state: Arc<PipelineState>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let download_permits = Semaphore::new(settings.max_concurrent_downloads.max(1));
        let publish_permits = Semaphore::new(settings.max_concurrent_publishes.max(1));

        Arc::new(Self {
            settings,
            collaborators,
            store,
            dedup,
            queue,
            state,
            download_permits,
            publish_permits,
            shutdown,
        })
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Drive `item` from its ready gate to a terminal outcome.
    ///
    /// Always releases the item from the queue and, unless interrupted by
    /// shutdown, from the ongoing set.
    pub async fn run(&self, item: WorkItem, admission: Admission) -> ItemOutcome {
        let outcome = self.drive(&item, admission).await;
        self.finalize(&item, &outcome).await;
        outcome
    }

    async fn drive(&self, item: &WorkItem, admission: Admission) -> ItemOutcome {
        let identity = &item.identity;
        let Admission { gate, cancel: operator_cancel } = admission;

        // One token for the item, fired by either an operator cancel or shutdown.
        let cancel = self.shutdown.child_token();
        let _cancel_guard = cancel.clone().drop_guard();
        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = operator_cancel.cancelled() => cancel.cancel(),
                    _ = cancel.cancelled() => {}
                }
            });
        }

        let signal = tokio::select! {
            signal = gate.wait() => signal,
            _ = cancel.cancelled() => GateSignal::Cancelled,
        };
        if signal == GateSignal::Cancelled {
            return self.stopped();
        }

        tracing::info!(identity = %identity, title = %item.title, "Starting pipeline");

        let record = match self
            .persist("load release", || self.store.get_release(identity))
            .await
        {
            Ok(record) => record,
            Err(e) => {
                let labels: Vec<QualityLabel> =
                    self.settings.profiles.iter().map(|p| p.label.clone()).collect();
                self.fail_qualities(identity, &labels, &e).await;
                return ItemOutcome::Failed {
                    uploaded: Vec::new(),
                    failed: labels,
                    error: e.to_string(),
                };
            }
        };

        let mut uploaded = Vec::new();
        let mut pending = Vec::new();
        for profile in &self.settings.profiles {
            if record.as_ref().is_some_and(|r| r.is_uploaded(&profile.label)) {
                self.state
                    .transition(identity, &profile.label, QualityState::Uploaded);
                uploaded.push(profile.label.clone());
            } else {
                pending.push(profile.label.clone());
            }
        }

        if pending.is_empty() {
            tracing::info!(identity = %identity, "Every quality already uploaded");
            return ItemOutcome::Completed { uploaded };
        }

        for label in &pending {
            self.state
                .transition(identity, label, QualityState::Downloading);
        }
        self.status(item, &format!("‣ {}\nDownloading", item.title))
            .await;

        let source = match self.download(item, &cancel).await {
            Ok(path) => path,
            Err(StageError::Cancelled) => return self.stopped(),
            Err(e) => {
                tracing::error!(identity = %identity, "Download failed: {}", e);
                self.fail_qualities(identity, &pending, &e).await;
                return ItemOutcome::Failed {
                    uploaded,
                    failed: pending,
                    error: e.to_string(),
                };
            }
        };

        let mut failed = Vec::new();
        let mut first_error = None;

        for (index, profile) in self.settings.profiles.iter().enumerate() {
            if !pending.contains(&profile.label) {
                continue;
            }

            match self
                .process_quality(item, profile, &source, index, &cancel)
                .await
            {
                Ok(_) => uploaded.push(profile.label.clone()),
                Err(StageError::Cancelled) => {
                    remove_quietly(&source).await;
                    return self.stopped();
                }
                Err(e) => {
                    tracing::error!(
                        identity = %identity,
                        quality = %profile.label,
                        "Quality failed: {}",
                        e
                    );
                    self.fail_qualities(identity, std::slice::from_ref(&profile.label), &e)
                        .await;
                    failed.push(profile.label.clone());
                    first_error.get_or_insert_with(|| e.to_string());
                }
            }
        }

        remove_quietly(&source).await;

        match first_error {
            None => ItemOutcome::Completed { uploaded },
            Some(error) => ItemOutcome::Failed {
                uploaded,
                failed,
                error,
            },
        }
    }

    fn stopped(&self) -> ItemOutcome {
        if self.shutdown.is_cancelled() {
            ItemOutcome::Interrupted
        } else {
            ItemOutcome::Cancelled
        }
    }

    async fn finalize(&self, item: &WorkItem, outcome: &ItemOutcome) {
        let identity = &item.identity;

        // `None` completes the ongoing entry, `Some(reason)` abandons it.
        let release = match outcome {
            ItemOutcome::Completed { uploaded } => {
                tracing::info!(identity = %identity, qualities = uploaded.len(), "Item completed");
                self.state.broadcast(PipelineEvent::ItemCompleted {
                    identity: identity.clone(),
                });
                Some(None)
            }
            ItemOutcome::Failed { error, .. } => {
                self.state.broadcast(PipelineEvent::ItemFailed {
                    identity: identity.clone(),
                    error: error.clone(),
                });
                Some(Some(error.clone()))
            }
            ItemOutcome::Cancelled => {
                self.state.broadcast(PipelineEvent::ItemCancelled {
                    identity: identity.clone(),
                });
                Some(Some("cancelled".to_string()))
            }
            ItemOutcome::Interrupted => {
                tracing::info!(identity = %identity, "Item interrupted by shutdown, left ongoing");
                None
            }
        };

        if let Some(reason) = release {
            let released = self
                .persist("release ongoing entry", || {
                    let (identity, reason) = (identity.clone(), reason.clone());
                    self.dedup.blocking(move |dedup| match reason {
                        None => dedup.complete(&identity),
                        Some(reason) => dedup.abandon(&identity, &reason),
                    })
                })
                .await;
            if let Err(e) = released {
                tracing::error!(identity = %identity, "Ongoing entry left behind: {}", e);
            }
        }

        self.queue.finish(identity);
        self.collaborators
            .notifier
            .end_status(identity.as_str())
            .await;
        self.state.forget_item(identity);
    }

    async fn download(
        &self,
        item: &WorkItem,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, StageError> {
        tokio::fs::create_dir_all(&self.settings.download_dir)
            .await
            .map_err(|e| StageError::logic("download", e))?;
        let destination = self.settings.download_dir.join(source_file_name(item));

        let _permit = tokio::select! {
            permit = self.download_permits.acquire() => {
                permit.map_err(|e| StageError::logic("download", e))?
            }
            _ = cancel.cancelled() => return Err(StageError::Cancelled),
        };

        let result = tokio::select! {
            result = self.settings.download_retry.run("download", |attempt| {
                self.download_once(item, &destination, attempt)
            }) => result,
            _ = cancel.cancelled() => Err(StageError::Cancelled),
        };

        if result.is_err() {
            remove_quietly(&destination).await;
        }
        result
    }

    async fn download_once(
        &self,
        item: &WorkItem,
        destination: &Path,
        attempt: u32,
    ) -> Result<PathBuf, StageError> {
        tracing::info!(
            identity = %item.identity,
            attempt,
            locator = %item.source_locator,
            "Downloading source"
        );

        let timeout = self.settings.download_timeout;
        let download = self
            .collaborators
            .downloader
            .download(&item.source_locator, destination);

        let written = match tokio::time::timeout(timeout, download).await {
            Ok(Ok(path)) => path,
            Ok(Err(e)) => {
                remove_quietly(destination).await;
                return Err(StageError::TransientIo {
                    stage: "download",
                    message: format!("{:#}", e),
                });
            }
            Err(_) => {
                remove_quietly(destination).await;
                return Err(StageError::TimedOut {
                    stage: "download",
                    after: timeout,
                });
            }
        };

        let size = tokio::fs::metadata(&written)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        if size == 0 {
            remove_quietly(&written).await;
            return Err(StageError::TransientIo {
                stage: "download",
                message: format!("{:?} is missing or empty", written),
            });
        }

        Ok(written)
    }

    async fn process_quality(
        &self,
        item: &WorkItem,
        profile: &QualityProfile,
        source: &Path,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<ArtifactHandle, StageError> {
        let identity = &item.identity;
        let label = &profile.label;
        let output = self
            .settings
            .encode_dir
            .join(artifact_file_name(identity, label));

        let guard = tokio::select! {
            guard = self.queue.slot().acquire(identity) => {
                guard.map_err(|e| StageError::logic("transcode", e))?
            }
            _ = cancel.cancelled() => return Err(StageError::Cancelled),
        };

        self.state
            .transition(identity, label, QualityState::Transcoding);
        let transcoded = self
            .transcode(item, profile, source, &output, index, cancel)
            .await;
        drop(guard);

        let artifact = match transcoded {
            Ok(path) => path,
            Err(e) => {
                remove_quietly(&output).await;
                return Err(e);
            }
        };

        self.state
            .transition(identity, label, QualityState::Publishing);
        self.status(item, &format!("‣ {} [{}p]\nPublishing", item.title, label))
            .await;

        let published = self.publish_and_record(item, label, &artifact).await;
        if published.is_err() || self.settings.auto_delete {
            remove_quietly(&artifact).await;
        }
        published
    }

    async fn transcode(
        &self,
        item: &WorkItem,
        profile: &QualityProfile,
        source: &Path,
        output: &Path,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, StageError> {
        let total = self.settings.profiles.len();
        let (status_tx, mut status_rx) = watch::channel(String::new());

        let on_progress: ProgressCallback = {
            let state = self.state.clone();
            let identity = item.identity.clone();
            let quality = profile.label.clone();
            let title = item.title.clone();
            Arc::new(move |sample: &TranscodeProgress| {
                state.broadcast(PipelineEvent::Progress {
                    identity: identity.clone(),
                    quality: quality.clone(),
                    percent: sample.percent().unwrap_or(0.0),
                });
                status_tx.send_replace(progress::status_text(
                    &title,
                    quality.as_str(),
                    sample,
                    index,
                    total,
                ));
            })
        };

        let forwarder = {
            let notifier = self.collaborators.notifier.clone();
            let topic = item.identity.to_string();
            tokio::spawn(async move {
                while status_rx.changed().await.is_ok() {
                    let text = status_rx.borrow_and_update().clone();
                    if let Err(e) = notifier.post_status(&topic, &text).await {
                        tracing::debug!(topic = %topic, "Status update failed: {:#}", e);
                    }
                }
            })
        };

        tracing::info!(
            identity = %item.identity,
            quality = %profile.label,
            "Transcoding {}/{}",
            index + 1,
            total
        );

        let timeout = self.settings.transcode_timeout;
        let run = self.collaborators.transcoder.transcode(
            source,
            profile,
            output,
            on_progress,
            cancel.clone(),
        );

        let result = tokio::select! {
            result = tokio::time::timeout(timeout, run) => match result {
                Ok(Ok(path)) => Ok(path),
                Ok(Err(_)) if cancel.is_cancelled() => Err(StageError::Cancelled),
                Ok(Err(e)) => Err(StageError::Logic {
                    stage: "transcode",
                    message: format!("{:#}", e),
                }),
                Err(_) => Err(StageError::TimedOut {
                    stage: "transcode",
                    after: timeout,
                }),
            },
            _ = cancel.cancelled() => Err(StageError::Cancelled),
        };

        forwarder.abort();
        result
    }

    /// Publish, then record the quality as uploaded and refresh the release post.
    ///
    /// The quality is marked pending before anything is published, so a crash
    /// between publish and record never leaves an uploaded entry behind.
    async fn publish_and_record(
        &self,
        item: &WorkItem,
        label: &QualityLabel,
        artifact: &Path,
    ) -> Result<ArtifactHandle, StageError> {
        let identity = &item.identity;

        self.persist("mark pending", || {
            self.store.mark_pending(identity, &item.title, label)
        })
        .await?;

        let handle = {
            let _permit = self
                .publish_permits
                .acquire()
                .await
                .map_err(|e| StageError::logic("publish", e))?;

            let timeout = self.settings.publish_timeout;
            match tokio::time::timeout(timeout, self.collaborators.publishers.publish(artifact))
                .await
            {
                Ok(Ok(handle)) => handle,
                Ok(Err(e)) => {
                    return Err(StageError::Logic {
                        stage: "publish",
                        message: format!("{:#}", e),
                    })
                }
                Err(_) => {
                    return Err(StageError::TimedOut {
                        stage: "publish",
                        after: timeout,
                    })
                }
            }
        };

        let post = self.release_post(item).await?;

        let outcome = self
            .persist("record quality", || {
                self.store
                    .upsert_quality(identity, label, &handle, post.as_ref(), false)
            })
            .await?;
        tracing::info!(
            identity = %identity,
            quality = %label,
            handle = %handle,
            outcome = ?outcome,
            "Quality uploaded"
        );

        self.state
            .transition(identity, label, QualityState::Uploaded);
        self.state.broadcast(PipelineEvent::QualityUploaded {
            identity: identity.clone(),
            quality: label.clone(),
            artifact_handle: handle.clone(),
        });

        if let Some(post) = &post {
            self.announce(item, post).await;
        }

        Ok(handle)
    }

    /// The shared release post, created on the first uploaded quality.
    ///
    /// A channel failure leaves the quality without a post rather than failing it.
    async fn release_post(&self, item: &WorkItem) -> Result<Option<PublishPostHandle>, StageError> {
        let identity = &item.identity;

        if let Some(post) = self
            .persist("load release post", || self.store.get_publish_post(identity))
            .await?
        {
            return Ok(Some(post));
        }

        let created = match self
            .collaborators
            .notifier
            .create_release_post(identity, &item.title)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(identity = %identity, "Failed to create release post: {:#}", e);
                return Ok(None);
            }
        };

        let stored = self
            .persist("store release post", || {
                self.store.set_publish_post_if_absent(identity, &created)
            })
            .await?;
        if stored != created {
            tracing::warn!(
                identity = %identity,
                orphaned = %created,
                "Release post created concurrently, keeping the earlier one"
            );
        }

        Ok(Some(stored))
    }

    async fn announce(&self, item: &WorkItem, post: &PublishPostHandle) {
        let record = match self.store.get_release(&item.identity).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(identity = %item.identity, "Cannot load release for announcement: {}", e);
                return;
            }
        };

        let mut qualities: Vec<(QualityLabel, ArtifactHandle)> = record
            .uploaded()
            .map(|(q, h)| (q.clone(), h.clone()))
            .collect();
        qualities.sort_by_key(|(q, _)| {
            self.settings
                .profiles
                .iter()
                .position(|p| &p.label == q)
                .unwrap_or(usize::MAX)
        });

        let announcement = ReleaseAnnouncement {
            identity: item.identity.clone(),
            title: record.title.clone().unwrap_or_else(|| item.title.clone()),
            qualities,
        };

        if let Err(e) = self
            .collaborators
            .notifier
            .post_release(post, &announcement)
            .await
        {
            tracing::warn!(identity = %item.identity, post = %post, "Failed to update release post: {:#}", e);
        }
    }

    /// Run a store operation under the persistence retry policy.
    ///
    /// Only database errors are retried. Exhaustion raises an operator alert.
    async fn persist<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, StageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = releaseforge_common::Result<T>>,
    {
        let mut attempts = 0;
        let result = self
            .settings
            .persistence_retry
            .run_while(
                what,
                |attempt| {
                    attempts = attempt;
                    op()
                },
                Error::is_database,
            )
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::error!(what, attempts, "Persistence failed: {}", e);
                self.alert(&format!(
                    "Persistence failure during {} after {} attempt(s): {}",
                    what, attempts, e
                ))
                .await;
                Err(StageError::Persistence(e))
            }
        }
    }

    /// Record terminal failure of `labels` and tell the operator.
    async fn fail_qualities(&self, identity: &Identity, labels: &[QualityLabel], error: &StageError) {
        let message = error.to_string();

        for label in labels {
            self.state.transition(identity, label, QualityState::Failed);
            self.state.broadcast(PipelineEvent::QualityFailed {
                identity: identity.clone(),
                quality: label.clone(),
                error: message.clone(),
            });

            let marked = self
                .settings
                .persistence_retry
                .run_while(
                    "mark failed",
                    |_| self.store.mark_failed(identity, label, &message),
                    Error::is_database,
                )
                .await;
            if let Err(e) = marked {
                tracing::error!(identity = %identity, quality = %label, "Failed to record failure mark: {}", e);
            }
        }

        let labels: Vec<&str> = labels.iter().map(QualityLabel::as_str).collect();
        self.alert(&format!(
            "{} [{}] failed: {}",
            identity,
            labels.join(", "),
            message
        ))
        .await;
    }

    /// Send an operator alert. Channel failures are only logged.
    pub(crate) async fn alert(&self, text: &str) {
        if let Err(e) = self.collaborators.notifier.alert(text).await {
            tracing::warn!("Failed to send alert: {:#}", e);
        }
    }

    async fn status(&self, item: &WorkItem, text: &str) {
        if let Err(e) = self
            .collaborators
            .notifier
            .post_status(item.identity.as_str(), text)
            .await
        {
            tracing::debug!(identity = %item.identity, "Status update failed: {:#}", e);
        }
    }
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed local file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), "Failed to remove local file: {}", e),
    }
}

fn file_stem(identity: &Identity) -> String {
    identity.as_str().replace(':', "-")
}

/// Local file name of the downloaded source, keeping the locator's extension.
fn source_file_name(item: &WorkItem) -> String {
    let path = item
        .source_locator
        .split(|c| c == '?' || c == '#')
        .next()
        .unwrap_or_default();
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("mkv");

    format!("{}.{}", file_stem(&item.identity), ext)
}

fn artifact_file_name(identity: &Identity, quality: &QualityLabel) -> String {
    format!("{}-{}p.mkv", file_stem(identity), quality)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(locator: &str) -> WorkItem {
        WorkItem {
            identity: Identity::from_parts("Series A", 5),
            title: "Series A - 05".to_string(),
            source_locator: locator.to_string(),
            ingested_at: Utc::now(),
        }
    }

    #[test]
    fn test_source_file_name_keeps_extension() {
        assert_eq!(
            source_file_name(&item("https://cdn.example.org/a/ep05.mp4?token=x")),
            "series-a-5.mp4"
        );
        assert_eq!(
            source_file_name(&item("https://cdn.example.org/download/12345")),
            "series-a-5.mkv"
        );
    }

    #[test]
    fn test_artifact_file_name() {
        assert_eq!(
            artifact_file_name(&Identity::from_parts("Series A", 5), &QualityLabel::new("1080")),
            "series-a-5-1080p.mkv"
        );
    }

    #[test]
    fn test_stage_error_display() {
        let err = StageError::TimedOut {
            stage: "transcode",
            after: Duration::from_secs(3),
        };
        assert_eq!(err.to_string(), "transcode timed out after 3s");
        assert_eq!(
            StageError::Persistence(Error::database("locked")).to_string(),
            "persistence failed: Database error: locked"
        );
    }
}
