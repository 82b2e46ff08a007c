mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./releaseforge.toml",
        "~/.config/releaseforge/config.toml",
        "/etc/releaseforge/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

fn expand_paths(config: &mut Config) {
    fn expand(path: &mut std::path::PathBuf) {
        let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
        *path = expanded.into();
    }

    expand(&mut config.paths.data_dir);
    expand(&mut config.paths.download_dir);
    expand(&mut config.paths.encode_dir);
    if let Some(db) = config.paths.database.as_mut() {
        expand(db);
    }
    if let Some(dir) = config.publish.primary_dir.as_mut() {
        expand(dir);
    }
    for dir in &mut config.publish.backup_dirs {
        expand(dir);
    }
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.qualities.is_empty() {
        anyhow::bail!("At least one quality profile must be configured");
    }

    let mut labels = HashSet::new();
    for quality in &config.qualities {
        if quality.label.as_str().is_empty() {
            anyhow::bail!("Quality profile labels cannot be empty");
        }
        if quality.label.as_str().contains('|') {
            anyhow::bail!("Quality label '{}' cannot contain '|'", quality.label);
        }
        if !labels.insert(quality.label.clone()) {
            anyhow::bail!("Quality '{}' is configured twice", quality.label);
        }
        if quality.height == 0 {
            anyhow::bail!("Quality '{}' has a height of 0", quality.label);
        }
    }

    if config.dispatcher.cadence_secs == 0 {
        anyhow::bail!("Dispatcher cadence cannot be 0");
    }

    for (name, retry) in [
        ("download", &config.retry.download),
        ("persistence", &config.retry.persistence),
    ] {
        if retry.max_attempts == 0 {
            anyhow::bail!("Retry policy '{}' needs at least one attempt", name);
        }
    }

    if config.limits.max_concurrent_downloads == 0 || config.limits.max_concurrent_publishes == 0 {
        anyhow::bail!("Download and publish concurrency limits must be at least 1");
    }

    if config.telegram.enabled {
        if config.telegram.bot_token.is_empty() {
            anyhow::bail!("Telegram is enabled but has no bot token");
        }
        if config.telegram.main_channel == 0 {
            anyhow::bail!("Telegram is enabled but has no main channel");
        }
    }

    if config.delivery.notice_delete_secs == Some(0) {
        anyhow::bail!("Delivery notice delete delay must be at least one second");
    }

    match &config.publish.primary_dir {
        Some(dir) if !dir.exists() => {
            tracing::warn!("Publish directory does not exist yet: {:?}", dir);
        }
        None => {
            tracing::warn!("No publish directory configured; published artifacts stay in the encode directory");
        }
        _ => {}
    }

    if config.feed.urls.is_empty() {
        tracing::warn!("No feed URLs configured; only manual runs will be processed");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use releaseforge_common::QualityLabel;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        validate_config(&config).unwrap();
        assert_eq!(config.dispatcher.cadence_secs, 10);
        assert_eq!(config.dispatcher.drain_secs, 3);
        assert_eq!(config.retry.download.max_attempts, 3);
        assert_eq!(config.retry.download.backoff_secs, 5);
        assert_eq!(config.transcoder.progress_interval_secs, 7);
        assert_eq!(config.feed.poll_interval_secs, 60);
    }

    #[test]
    fn test_load_config_keeps_quality_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
auto_delete = true

[paths]
data_dir = "/tmp/rf"

[[qualities]]
label = "1080"
height = 1080

[[qualities]]
label = "480"
height = 480
crf = 28

[retry.download]
max_attempts = 5
backoff_secs = 1
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert!(config.auto_delete);
        assert_eq!(
            config.quality_labels(),
            vec![QualityLabel::new("1080"), QualityLabel::new("480")]
        );
        assert_eq!(config.qualities[1].crf, 28);
        assert_eq!(config.retry.download.max_attempts, 5);
        assert_eq!(config.retry.persistence.max_attempts, 3);
        assert_eq!(
            config.database_path(),
            std::path::PathBuf::from("/tmp/rf/releaseforge.db")
        );
    }

    #[test]
    fn test_duplicate_quality_rejected() {
        let mut config = Config::default();
        config.qualities.push(QualityProfile::new("720", 720));
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_telegram_requires_token() {
        let mut config = Config::default();
        config.telegram.enabled = true;
        config.telegram.main_channel = -100123;
        assert!(validate_config(&config).is_err());

        config.telegram.bot_token = "123:abc".to_string();
        validate_config(&config).unwrap();
    }

    #[test]
    fn test_delivery_notice_settings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[telegram]
poll_timeout_secs = 50

[delivery]
fallback_link = "https://releases.example/series"
notice_delete_secs = 600
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.telegram.poll_timeout(), std::time::Duration::from_secs(50));
        assert_eq!(
            config.delivery.notice_ttl(),
            Some(std::time::Duration::from_secs(600))
        );
        assert_eq!(Config::default().delivery.notice_ttl(), None);

        let mut config = Config::default();
        config.delivery.notice_delete_secs = Some(0);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = Config::default();
        config.retry.persistence.max_attempts = 0;
        assert!(validate_config(&config).is_err());
    }
}
