//! Transcoders producing one encoded artifact per quality profile.

mod ffmpeg;

pub use ffmpeg::{build_args, FfmpegTranscoder};

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::QualityProfile;

/// One progress sample from a running transcode.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscodeProgress {
    /// Position in the output timeline.
    pub out_time: Duration,
    /// Input duration, when known.
    pub total: Option<Duration>,
    /// Bytes written so far.
    pub size_bytes: u64,
    /// Encoding speed relative to realtime.
    pub speed: Option<f32>,
    /// Wall-clock time since the encode started.
    pub elapsed: Duration,
}

impl TranscodeProgress {
    /// Completion in percent, clamped to `0..=100`.
    pub fn percent(&self) -> Option<f32> {
        let total = self.total?.as_secs_f32();
        if total <= 0.0 {
            return None;
        }
        Some((self.out_time.as_secs_f32() / total * 100.0).clamp(0.0, 100.0))
    }

    /// Estimated remaining wall-clock time.
    pub fn eta(&self) -> Option<Duration> {
        let total = self.total?;
        let speed = self.speed.filter(|s| *s > 0.0)?;
        let remaining = total.saturating_sub(self.out_time).as_secs_f32() / speed;
        Some(Duration::from_secs_f32(remaining.max(0.0)))
    }

    /// Output throughput in bytes per second.
    pub fn throughput(&self) -> Option<f64> {
        let secs = self.elapsed.as_secs_f64();
        (secs > 0.0).then(|| self.size_bytes as f64 / secs)
    }
}

/// Receives progress samples. Observational only.
pub type ProgressCallback = Arc<dyn Fn(&TranscodeProgress) + Send + Sync>;

/// Encodes a source file for one quality profile.
#[async_trait::async_trait]
pub trait Transcoder: Send + Sync {
    /// Encode `input` into `output`.
    ///
    /// Must stop promptly once `cancel` fires and leave no running child
    /// process behind.
    async fn transcode(
        &self,
        input: &Path,
        profile: &QualityProfile,
        output: &Path,
        progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<PathBuf>;
}
