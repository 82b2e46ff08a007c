//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which creates an in-memory DB, a config rooted in
//! a temp directory, and scripted collaborators: a downloader that can fail a
//! set number of times, a transcoder that records concurrency, a publisher
//! that hands out fake URLs, and a channel that records everything posted.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use releaseforge::config::{Config, QualityProfile};
use releaseforge::coordinator::Coordinator;
use releaseforge::download::Downloader;
use releaseforge::ingest::Candidate;
use releaseforge::notifications::{NotificationChannel, ReleaseAnnouncement};
use releaseforge::pipeline::{Collaborators, ExecutorSettings, RetryPolicy};
use releaseforge::publish::{ArtifactPublisher, PublisherSet};
use releaseforge::store::ReleaseStore;
use releaseforge::transcode::{ProgressCallback, TranscodeProgress, Transcoder};
use releaseforge_common::{ArtifactHandle, Identity, PublishPostHandle, RecipientId};
use releaseforge_db::pool::{init_memory_pool, DbPool};

/// Test harness wiring a [`Coordinator`] to scripted collaborators and an
/// in-memory database.
pub struct TestHarness {
    pub dir: TempDir,
    pub db: DbPool,
    pub config: Config,
    pub downloader: Arc<StubDownloader>,
    pub transcoder: Arc<StubTranscoder>,
    pub publisher: Arc<StubPublisher>,
    pub channel: Arc<RecordingChannel>,
}

impl TestHarness {
    /// Harness with a one second dispatcher cadence and no drain delay.
    pub fn new() -> Self {
        Self::with_cadence(1)
    }

    pub fn with_cadence(cadence_secs: u64) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let db = init_memory_pool().expect("failed to create in-memory pool");

        let mut config = Config::default();
        config.paths.data_dir = dir.path().join("data");
        config.paths.download_dir = dir.path().join("downloads");
        config.paths.encode_dir = dir.path().join("encode");
        config.dispatcher.cadence_secs = cadence_secs;
        config.dispatcher.drain_secs = 0;
        config.qualities = vec![QualityProfile::new("720", 720), QualityProfile::new("1080", 1080)];

        Self {
            dir,
            db,
            config,
            downloader: Arc::new(StubDownloader::default()),
            transcoder: Arc::new(StubTranscoder::default()),
            publisher: Arc::new(StubPublisher::default()),
            channel: Arc::new(RecordingChannel::default()),
        }
    }

    /// Executor settings with millisecond backoffs and short timeouts.
    pub fn settings(&self) -> ExecutorSettings {
        let mut settings = ExecutorSettings::from_config(&self.config);
        settings.download_retry = RetryPolicy::new(3, Duration::from_millis(10));
        settings.persistence_retry = RetryPolicy::new(3, Duration::from_millis(10));
        settings.download_timeout = Duration::from_secs(30);
        settings.transcode_timeout = Duration::from_secs(30);
        settings.publish_timeout = Duration::from_secs(30);
        settings
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            downloader: self.downloader.clone(),
            transcoder: self.transcoder.clone(),
            publishers: PublisherSet::new(self.publisher.clone()),
            notifier: self.channel.clone(),
        }
    }

    pub fn coordinator(&self) -> Arc<Coordinator> {
        self.coordinator_with(self.settings())
    }

    pub fn coordinator_with(&self, settings: ExecutorSettings) -> Arc<Coordinator> {
        Coordinator::with_settings(&self.config, settings, self.db.clone(), self.collaborators())
            .expect("failed to build coordinator")
    }

    pub fn store(&self) -> ReleaseStore {
        ReleaseStore::new(self.db.clone())
    }
}

/// A feed entry for `episode` of "Series A".
pub fn episode(number: u32) -> Candidate {
    Candidate::new(
        format!("[Group] Series A - {:02} (1080p).mkv", number),
        format!("https://feed.test/series-a-{:02}.mkv", number),
    )
}

pub fn episode_identity(number: u32) -> Identity {
    Identity::from_parts("Series A", number)
}

// ---------------------------------------------------------------------------
// Downloader
// ---------------------------------------------------------------------------

/// Writes a small source file; fails the first `failures` calls.
#[derive(Default)]
pub struct StubDownloader {
    failures: AtomicU32,
    calls: AtomicU32,
}

impl StubDownloader {
    pub fn fail_times(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Downloader for StubDownloader {
    async fn download(&self, locator: &str, destination: &Path) -> Result<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            tokio::fs::write(destination, b"partial").await?;
            bail!("connection reset while fetching {}", locator);
        }

        tokio::fs::write(destination, format!("source:{}", locator)).await?;
        Ok(destination.to_path_buf())
    }
}

// ---------------------------------------------------------------------------
// Transcoder
// ---------------------------------------------------------------------------

/// Copies the source into the output and tracks how many encodes overlap.
#[derive(Default)]
pub struct StubTranscoder {
    delay: Mutex<Duration>,
    fail_label: Mutex<Option<String>>,
    block_until_cancelled: AtomicBool,
    calls: AtomicUsize,
    active: Arc<AtomicUsize>,
    peak: AtomicUsize,
    pub started: Notify,
}

impl StubTranscoder {
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn fail_quality(&self, label: &str) {
        *self.fail_label.lock() = Some(label.to_string());
    }

    /// When set, every encode runs until its cancellation token fires.
    pub fn block_until_cancelled(&self, block: bool) {
        self.block_until_cancelled.store(block, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transcoder for StubTranscoder {
    async fn transcode(
        &self,
        input: &Path,
        profile: &QualityProfile,
        output: &Path,
        progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _active = ActiveGuard(self.active.clone());
        self.started.notify_one();

        progress(&TranscodeProgress {
            out_time: Duration::from_secs(30),
            total: Some(Duration::from_secs(60)),
            size_bytes: 4096,
            speed: Some(2.0),
            elapsed: Duration::from_secs(1),
        });

        if self.block_until_cancelled.load(Ordering::SeqCst) {
            cancel.cancelled().await;
            bail!("encode cancelled");
        }

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.fail_label.lock().as_deref() == Some(profile.label.as_str()) {
            bail!("encoder exited with status 1");
        }

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output, format!("{}@{}", input.display(), profile.label)).await?;
        Ok(output.to_path_buf())
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// Returns `https://cdn.test/<file name>` for every artifact it is given.
#[derive(Default)]
pub struct StubPublisher {
    published: Mutex<Vec<String>>,
}

impl StubPublisher {
    pub fn published(&self) -> Vec<String> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl ArtifactPublisher for StubPublisher {
    fn name(&self) -> &str {
        "stub"
    }

    async fn publish(&self, path: &Path) -> Result<ArtifactHandle> {
        tokio::fs::metadata(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.published.lock().push(file_name.clone());
        Ok(ArtifactHandle::new(format!("https://cdn.test/{}", file_name)))
    }
}

// ---------------------------------------------------------------------------
// Notification channel
// ---------------------------------------------------------------------------

/// Records posts, announcements, alerts, and sent artifacts.
#[derive(Default)]
pub struct RecordingChannel {
    posts_created: AtomicUsize,
    statuses: AtomicUsize,
    fail_sends: AtomicU32,
    announcements: Mutex<Vec<(PublishPostHandle, ReleaseAnnouncement)>>,
    alerts: Mutex<Vec<String>>,
    sent: Mutex<Vec<(RecipientId, ArtifactHandle)>>,
}

impl RecordingChannel {
    pub fn posts_created(&self) -> usize {
        self.posts_created.load(Ordering::SeqCst)
    }

    pub fn statuses(&self) -> usize {
        self.statuses.load(Ordering::SeqCst)
    }

    pub fn announcements(&self) -> Vec<(PublishPostHandle, ReleaseAnnouncement)> {
        self.announcements.lock().clone()
    }

    pub fn alerts(&self) -> Vec<String> {
        self.alerts.lock().clone()
    }

    pub fn sent(&self) -> Vec<(RecipientId, ArtifactHandle)> {
        self.sent.lock().clone()
    }

    /// Fail the next `n` artifact sends.
    pub fn fail_sends(&self, n: u32) {
        self.fail_sends.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn post_status(&self, _topic: &str, _text: &str) -> Result<()> {
        self.statuses.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_release_post(
        &self,
        identity: &Identity,
        _title: &str,
    ) -> Result<PublishPostHandle> {
        let n = self.posts_created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PublishPostHandle::new(format!("post-{}-{}", identity, n)))
    }

    async fn post_release(
        &self,
        post: &PublishPostHandle,
        announcement: &ReleaseAnnouncement,
    ) -> Result<()> {
        self.announcements
            .lock()
            .push((post.clone(), announcement.clone()));
        Ok(())
    }

    async fn alert(&self, text: &str) -> Result<()> {
        self.alerts.lock().push(text.to_string());
        Ok(())
    }

    async fn send_artifact(
        &self,
        recipient: RecipientId,
        artifact: &ArtifactHandle,
        _caption: &str,
    ) -> Result<()> {
        let failing = self
            .fail_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            bail!("recipient blocked the bot");
        }
        self.sent.lock().push((recipient, artifact.clone()));
        Ok(())
    }
}
