//! ffmpeg-backed transcoder.
//!
//! Runs `ffmpeg -progress pipe:1` and parses the key/value progress blocks on
//! stdout. The input duration is read from the banner ffmpeg prints on stderr.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use regex::Regex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::{ProgressCallback, TranscodeProgress, Transcoder};
use crate::config::QualityProfile;

const STDERR_TAIL_LINES: usize = 20;

/// Transcoder driving an ffmpeg child process.
pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
    sample_interval: Duration,
    duration_pattern: Regex,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg: PathBuf, sample_interval: Duration) -> Result<Self> {
        Ok(Self {
            ffmpeg,
            sample_interval,
            duration_pattern: Regex::new(r"Duration:\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)")?,
        })
    }
}

/// ffmpeg arguments for encoding `input` to `output` with `profile`.
pub fn build_args(input: &Path, profile: &QualityProfile, output: &Path) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_string(),
        "-nostdin".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        input.to_string_lossy().to_string(),
        "-progress".to_string(),
        "pipe:1".to_string(),
        "-nostats".to_string(),
        "-map".to_string(),
        "0:v:0".to_string(),
        "-map".to_string(),
        "0:a?".to_string(),
        "-map".to_string(),
        "0:s?".to_string(),
        "-c:v".to_string(),
        profile.video_codec.clone(),
        "-preset".to_string(),
        profile.preset.clone(),
        "-crf".to_string(),
        profile.crf.to_string(),
        "-vf".to_string(),
        format!("scale=-2:{}", profile.height),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        profile.audio_bitrate.clone(),
        "-c:s".to_string(),
        "copy".to_string(),
    ];
    args.extend(profile.extra_args.iter().cloned());
    args.push(output.to_string_lossy().to_string());
    args
}

/// Fold one `key=value` progress line into `progress`.
///
/// Returns `true` at the end of a progress block.
fn apply_progress_line(line: &str, progress: &mut TranscodeProgress) -> bool {
    let Some((key, value)) = line.trim().split_once('=') else {
        return false;
    };

    match key {
        // ffmpeg reports out_time_us; out_time_ms is the same value under a legacy name.
        "out_time_us" | "out_time_ms" => {
            if let Ok(us) = value.parse::<u64>() {
                progress.out_time = Duration::from_micros(us);
            }
        }
        "total_size" => {
            if let Ok(size) = value.parse() {
                progress.size_bytes = size;
            }
        }
        "speed" => {
            progress.speed = value.trim_end_matches('x').trim().parse().ok();
        }
        "progress" => return true,
        _ => {}
    }

    false
}

fn parse_duration(pattern: &Regex, line: &str) -> Option<Duration> {
    let caps = pattern.captures(line)?;
    let hours: u64 = caps[1].parse().ok()?;
    let minutes: u64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    Some(Duration::from_secs(hours * 3600 + minutes * 60) + Duration::from_secs_f64(seconds))
}

#[async_trait::async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        input: &Path,
        profile: &QualityProfile,
        output: &Path,
        progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<PathBuf> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let args = build_args(input, profile, output);
        tracing::debug!(quality = %profile.label, "ffmpeg {}", args.join(" "));

        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {:?}", self.ffmpeg))?;

        let stdout = child.stdout.take().context("ffmpeg stdout not captured")?;
        let stderr = child.stderr.take().context("ffmpeg stderr not captured")?;

        let total = Arc::new(Mutex::new(None::<Duration>));
        let tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));

        let stderr_task = {
            let total = total.clone();
            let tail = tail.clone();
            let pattern = self.duration_pattern.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if total.lock().is_none() {
                        if let Some(d) = parse_duration(&pattern, &line) {
                            *total.lock() = Some(d);
                        }
                    }
                    let mut tail = tail.lock();
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            })
        };

        let started = Instant::now();
        let mut last_sample: Option<Instant> = None;
        let mut sample = TranscodeProgress::default();
        let mut lines = BufReader::new(stdout).lines();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(quality = %profile.label, "Cancelling transcode");
                    let _ = child.kill().await;
                    stderr_task.abort();
                    anyhow::bail!("transcode cancelled");
                }
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    if apply_progress_line(&line, &mut sample) {
                        let due = last_sample.map_or(true, |t| t.elapsed() >= self.sample_interval);
                        if due {
                            sample.total = *total.lock();
                            sample.elapsed = started.elapsed();
                            progress(&sample);
                            last_sample = Some(Instant::now());
                        }
                    }
                }
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                stderr_task.abort();
                anyhow::bail!("transcode cancelled");
            }
            status = child.wait() => status?,
        };
        let _ = stderr_task.await;

        if !status.success() {
            let tail: Vec<String> = tail.lock().iter().cloned().collect();
            anyhow::bail!("ffmpeg exited with {}: {}", status, tail.join("\n"));
        }

        let size = tokio::fs::metadata(output)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        if size == 0 {
            anyhow::bail!("ffmpeg produced no output at {:?}", output);
        }

        Ok(output.to_path_buf())
    }
}
