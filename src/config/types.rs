use releaseforge_common::QualityLabel;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub feed: FeedConfig,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Ordered quality profiles; each accepted item is encoded once per entry.
    #[serde(default = "default_qualities")]
    pub qualities: Vec<QualityProfile>,

    #[serde(default)]
    pub retry: RetrySection,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    #[serde(default)]
    pub transcoder: TranscoderConfig,

    #[serde(default)]
    pub publish: PublishConfig,

    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Remove encoded artifacts once they are published
    #[serde(default)]
    pub auto_delete: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            feed: FeedConfig::default(),
            dispatcher: DispatcherConfig::default(),
            qualities: default_qualities(),
            retry: RetrySection::default(),
            limits: LimitsConfig::default(),
            timeouts: TimeoutsConfig::default(),
            transcoder: TranscoderConfig::default(),
            publish: PublishConfig::default(),
            telegram: TelegramConfig::default(),
            delivery: DeliveryConfig::default(),
            auto_delete: false,
        }
    }
}

impl Config {
    /// Labels of the configured qualities, in processing order.
    pub fn quality_labels(&self) -> Vec<QualityLabel> {
        self.qualities.iter().map(|q| q.label.clone()).collect()
    }

    /// Path of the SQLite state database.
    pub fn database_path(&self) -> PathBuf {
        self.paths
            .database
            .clone()
            .unwrap_or_else(|| self.paths.data_dir.join("releaseforge.db"))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Override for the database file (default: `<data_dir>/releaseforge.db`)
    #[serde(default)]
    pub database: Option<PathBuf>,

    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    #[serde(default = "default_encode_dir")]
    pub encode_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}
fn default_encode_dir() -> PathBuf {
    PathBuf::from("./encode")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database: None,
            download_dir: default_download_dir(),
            encode_dir: default_encode_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedConfig {
    /// RSS feed URLs polled for new candidates
    #[serde(default)]
    pub urls: Vec<String>,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval() -> u64 {
    60
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl FeedConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatcherConfig {
    /// Interval between admission cycles
    #[serde(default = "default_cadence")]
    pub cadence_secs: u64,

    /// Pause after each admission
    #[serde(default = "default_drain")]
    pub drain_secs: u64,
}

fn default_cadence() -> u64 {
    10
}
fn default_drain() -> u64 {
    3
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            cadence_secs: default_cadence(),
            drain_secs: default_drain(),
        }
    }
}

impl DispatcherConfig {
    pub fn cadence(&self) -> Duration {
        Duration::from_secs(self.cadence_secs)
    }

    pub fn drain(&self) -> Duration {
        Duration::from_secs(self.drain_secs)
    }
}

/// One encode target.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct QualityProfile {
    pub label: QualityLabel,

    /// Output frame height in pixels
    pub height: u32,

    #[serde(default = "default_crf")]
    pub crf: u8,

    #[serde(default = "default_preset")]
    pub preset: String,

    #[serde(default = "default_video_codec")]
    pub video_codec: String,

    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,

    /// Extra ffmpeg arguments appended before the output path
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_crf() -> u8 {
    24
}
fn default_preset() -> String {
    "veryfast".to_string()
}
fn default_video_codec() -> String {
    "libx264".to_string()
}
fn default_audio_bitrate() -> String {
    "128k".to_string()
}

impl QualityProfile {
    pub fn new(label: impl Into<QualityLabel>, height: u32) -> Self {
        Self {
            label: label.into(),
            height,
            crf: default_crf(),
            preset: default_preset(),
            video_codec: default_video_codec(),
            audio_bitrate: default_audio_bitrate(),
            extra_args: Vec::new(),
        }
    }
}

fn default_qualities() -> Vec<QualityProfile> {
    vec![QualityProfile::new("720", 720), QualityProfile::new("1080", 1080)]
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrySection {
    #[serde(default = "default_download_retry")]
    pub download: RetryConfig,

    #[serde(default = "default_persistence_retry")]
    pub persistence: RetryConfig,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            download: default_download_retry(),
            persistence: default_persistence_retry(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Fixed delay between attempts
    pub backoff_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        default_download_retry()
    }
}

fn default_download_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        backoff_secs: 5,
    }
}
fn default_persistence_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        backoff_secs: 2,
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    #[serde(default = "default_concurrent")]
    pub max_concurrent_downloads: usize,

    #[serde(default = "default_concurrent")]
    pub max_concurrent_publishes: usize,
}

fn default_concurrent() -> usize {
    2
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: default_concurrent(),
            max_concurrent_publishes: default_concurrent(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_download_timeout")]
    pub download_secs: u64,

    #[serde(default = "default_transcode_timeout")]
    pub transcode_secs: u64,

    #[serde(default = "default_publish_timeout")]
    pub publish_secs: u64,
}

fn default_download_timeout() -> u64 {
    3600
}
fn default_transcode_timeout() -> u64 {
    4 * 3600
}
fn default_publish_timeout() -> u64 {
    1800
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            download_secs: default_download_timeout(),
            transcode_secs: default_transcode_timeout(),
            publish_secs: default_publish_timeout(),
        }
    }
}

impl TimeoutsConfig {
    pub fn download(&self) -> Duration {
        Duration::from_secs(self.download_secs)
    }

    pub fn transcode(&self) -> Duration {
        Duration::from_secs(self.transcode_secs)
    }

    pub fn publish(&self) -> Duration {
        Duration::from_secs(self.publish_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscoderConfig {
    /// Custom ffmpeg binary
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Interval between progress samples
    #[serde(default = "default_progress_interval")]
    pub progress_interval_secs: u64,
}

fn default_progress_interval() -> u64 {
    7
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            progress_interval_secs: default_progress_interval(),
        }
    }
}

impl TranscoderConfig {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PublishConfig {
    /// Directory the primary publisher copies artifacts into
    #[serde(default)]
    pub primary_dir: Option<PathBuf>,

    /// Public URL prefix under which `primary_dir` is served
    #[serde(default)]
    pub public_base_url: Option<String>,

    /// Best-effort mirror directories
    #[serde(default)]
    pub backup_dirs: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub bot_token: String,

    /// Public channel receiving release posts
    #[serde(default)]
    pub main_channel: i64,

    /// Operator chat receiving status updates and alerts
    #[serde(default)]
    pub log_channel: Option<i64>,

    #[serde(default = "default_telegram_api")]
    pub api_base: String,

    /// Long-poll wait of `getUpdates` for delivery button presses
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout() -> u64 {
    30
}

impl TelegramConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: String::new(),
            main_channel: 0,
            log_channel: None,
            api_base: default_telegram_api(),
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeliveryConfig {
    /// Link handed to recipients who already received a quality
    #[serde(default = "default_fallback_link")]
    pub fallback_link: String,

    /// Post a "file delivered" notice and delete it after this many seconds
    #[serde(default)]
    pub notice_delete_secs: Option<u64>,
}

impl DeliveryConfig {
    pub fn notice_ttl(&self) -> Option<Duration> {
        self.notice_delete_secs.map(Duration::from_secs)
    }
}

fn default_fallback_link() -> String {
    "https://example.org/releases".to_string()
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            fallback_link: default_fallback_link(),
            notice_delete_secs: None,
        }
    }
}
