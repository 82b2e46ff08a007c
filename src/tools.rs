//! External tool discovery.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Availability of an external tool.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: String,
    pub available: bool,
    /// First line of the tool's version output.
    pub version: Option<String>,
    pub path: Option<PathBuf>,
}

/// Probe `program` by running it with `version_arg`.
pub fn check_tool(name: &str, program: &Path, version_arg: &str) -> ToolInfo {
    match Command::new(program).arg(version_arg).output() {
        Ok(output) if output.status.success() => ToolInfo {
            name: name.to_string(),
            available: true,
            version: String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .map(|s| s.to_string()),
            path: which::which(program).ok(),
        },
        _ => ToolInfo {
            name: name.to_string(),
            available: false,
            version: None,
            path: None,
        },
    }
}

/// Tools the pipeline shells out to.
pub fn check_tools(ffmpeg_path: Option<&Path>) -> Vec<ToolInfo> {
    let ffmpeg = ffmpeg_path.unwrap_or_else(|| Path::new("ffmpeg"));
    vec![check_tool("ffmpeg", ffmpeg, "-version")]
}

/// Resolve the ffmpeg binary, preferring a configured path over `PATH`.
pub fn ffmpeg_path(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        tracing::warn!(path = %path.display(), "Configured ffmpeg not found, searching PATH");
    }

    which::which("ffmpeg").context("ffmpeg not found in PATH")
}
