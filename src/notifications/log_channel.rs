use anyhow::Result;
use releaseforge_common::{ArtifactHandle, Identity, PublishPostHandle, RecipientId};

use super::{announcement_text, NotificationChannel, ReleaseAnnouncement};

/// Channel that only writes to the log.
///
/// Release posts get a synthetic handle derived from the identity.
#[derive(Debug, Default)]
pub struct LogChannel;

impl LogChannel {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn post_status(&self, topic: &str, text: &str) -> Result<()> {
        tracing::info!(topic, "{}", text);
        Ok(())
    }

    async fn create_release_post(
        &self,
        identity: &Identity,
        title: &str,
    ) -> Result<PublishPostHandle> {
        tracing::info!(identity = %identity, "Release post created: {}", title);
        Ok(PublishPostHandle::new(format!("log:{}", identity)))
    }

    async fn post_release(
        &self,
        post: &PublishPostHandle,
        announcement: &ReleaseAnnouncement,
    ) -> Result<()> {
        let triggers: Vec<String> = announcement
            .triggers()
            .into_iter()
            .map(|(_, t)| t.payload())
            .collect();
        tracing::info!(
            post = %post,
            triggers = ?triggers,
            "{}",
            announcement_text(announcement)
        );
        Ok(())
    }

    async fn alert(&self, text: &str) -> Result<()> {
        tracing::error!("ALERT: {}", text);
        Ok(())
    }

    async fn send_artifact(
        &self,
        recipient: RecipientId,
        artifact: &ArtifactHandle,
        caption: &str,
    ) -> Result<()> {
        tracing::info!(recipient = %recipient, artifact = %artifact, "Delivered: {}", caption);
        Ok(())
    }
}
