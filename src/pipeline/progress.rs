//! Human-readable transcode status lines.

use std::time::Duration;

use crate::transcode::TranscodeProgress;

const BAR_CELLS: usize = 12;

/// Render the status text for one progress sample.
///
/// `encoded` is the number of qualities of this item already finished and
/// `total` the number configured.
pub fn status_text(
    title: &str,
    quality: &str,
    progress: &TranscodeProgress,
    encoded: usize,
    total: usize,
) -> String {
    let percent = progress.percent().unwrap_or(0.0);

    let estimated_total = (percent > 0.0)
        .then(|| (progress.size_bytes as f64 * 100.0 / f64::from(percent)) as u64)
        .map(format_bytes)
        .unwrap_or_else(|| "?".to_string());
    let speed = progress
        .throughput()
        .map(|bps| format!("{}/s", format_bytes(bps as u64)))
        .unwrap_or_else(|| "-".to_string());
    let eta = progress
        .eta()
        .map(format_duration)
        .unwrap_or_else(|| "-".to_string());

    format!(
        "‣ {title} [{quality}p]\n\
         [{bar}] {percent:.2}%\n\
         ‣ Size : {size} out of ~ {estimated_total}\n\
         ‣ Speed : {speed}\n\
         ‣ Time Took : {took}\n\
         ‣ Time Left : {eta}\n\
         ‣ File(s) Encoded: {encoded} / {total}",
        bar = bar(percent),
        size = format_bytes(progress.size_bytes),
        took = format_duration(progress.elapsed),
    )
}

/// Twelve-cell bar, one filled cell per 8%.
pub fn bar(percent: f32) -> String {
    let filled = ((percent.clamp(0.0, 100.0) / 8.0).floor() as usize).min(BAR_CELLS);
    format!("{}{}", "█".repeat(filled), "▒".repeat(BAR_CELLS - filled))
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);

    if h > 0 {
        format!("{}h {}m {}s", h, m, s)
    } else if m > 0 {
        format!("{}m {}s", m, s)
    } else {
        format!("{}s", s)
    }
}
