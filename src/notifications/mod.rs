//! Notification channels: operator status, release announcements, and
//! artifact delivery to recipients.

mod log_channel;
mod telegram;

pub use log_channel::LogChannel;
pub use telegram::TelegramChannel;

use anyhow::Result;
use releaseforge_common::{ArtifactHandle, Identity, PublishPostHandle, QualityLabel, RecipientId};
use std::sync::Arc;

use crate::config::Config;
use crate::delivery::{DeliveryTrigger, PressSource};

/// Content of a release post: the episode and every quality uploaded so far.
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseAnnouncement {
    pub identity: Identity,
    pub title: String,
    pub qualities: Vec<(QualityLabel, ArtifactHandle)>,
}

impl ReleaseAnnouncement {
    /// One delivery trigger per uploaded quality.
    pub fn triggers(&self) -> Vec<(QualityLabel, DeliveryTrigger)> {
        self.qualities
            .iter()
            .map(|(quality, _)| {
                (
                    quality.clone(),
                    DeliveryTrigger::new(self.identity.clone(), quality.clone()),
                )
            })
            .collect()
    }
}

#[async_trait::async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    /// Post or refresh the operator status line for `topic`.
    async fn post_status(&self, topic: &str, text: &str) -> Result<()>;

    /// Forget the status line for `topic`; the next status starts a new one.
    async fn end_status(&self, _topic: &str) {}

    /// Create the public post that all qualities of an episode attach to.
    async fn create_release_post(&self, identity: &Identity, title: &str)
        -> Result<PublishPostHandle>;

    /// Rewrite the release post with the current set of delivery triggers.
    async fn post_release(
        &self,
        post: &PublishPostHandle,
        announcement: &ReleaseAnnouncement,
    ) -> Result<()>;

    /// Operator alert for failures that need attention.
    async fn alert(&self, text: &str) -> Result<()>;

    /// Send a published artifact to a single recipient.
    async fn send_artifact(
        &self,
        recipient: RecipientId,
        artifact: &ArtifactHandle,
        caption: &str,
    ) -> Result<()>;
}

/// Build the channel selected by the configuration.
pub fn build_channel(config: &Config) -> Arc<dyn NotificationChannel> {
    build_channels(config).0
}

/// Build the configured channel, plus its button press source when the
/// channel can receive presses.
pub fn build_channels(
    config: &Config,
) -> (Arc<dyn NotificationChannel>, Option<Arc<dyn PressSource>>) {
    if config.telegram.enabled {
        tracing::info!(
            channel = config.telegram.main_channel,
            "Using Telegram notification channel"
        );
        let telegram = Arc::new(TelegramChannel::new(&config.telegram));
        (telegram.clone(), Some(telegram))
    } else {
        tracing::info!("No notification channel configured, logging only");
        (Arc::new(LogChannel::new()), None)
    }
}

/// Render the announcement body shared by all adapters.
pub(crate) fn announcement_text(announcement: &ReleaseAnnouncement) -> String {
    let mut text = format!("{}\n", announcement.title);
    if announcement.qualities.is_empty() {
        text.push_str("\nEncoding in progress");
    } else {
        let labels: Vec<String> = announcement
            .qualities
            .iter()
            .map(|(q, _)| format!("{}p", q))
            .collect();
        text.push_str(&format!("\nAvailable: {}", labels.join(" | ")));
    }
    text
}
