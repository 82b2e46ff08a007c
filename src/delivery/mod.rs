//! Delivery of published artifacts to recipients who press a release button.
//!
//! Each (identity, quality, recipient) is delivered at most once. A second
//! press gets the fallback link instead of another copy.

mod listener;
mod trigger;

pub use listener::{ButtonPress, DeliveryListener, PressSource};
pub use trigger::{DeliveryTrigger, MalformedTrigger};

use anyhow::Result;
use releaseforge_common::{ArtifactHandle, RecipientId};
use std::sync::Arc;

use crate::notifications::NotificationChannel;
use crate::store::ReleaseStore;

/// Result of handling one delivery trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The artifact was sent to the recipient.
    Delivered { artifact: ArtifactHandle },
    /// The recipient already received this quality.
    AlreadyReceived { fallback_link: String },
    /// No uploaded artifact exists for the trigger.
    NotFound,
}

pub struct DeliveryService {
    store: ReleaseStore,
    channel: Arc<dyn NotificationChannel>,
    fallback_link: String,
}

impl DeliveryService {
    pub fn new(
        store: ReleaseStore,
        channel: Arc<dyn NotificationChannel>,
        fallback_link: impl Into<String>,
    ) -> Self {
        Self {
            store,
            channel,
            fallback_link: fallback_link.into(),
        }
    }

    /// Handle a button press carrying `payload` from `recipient`.
    pub async fn handle_trigger(
        &self,
        payload: &str,
        recipient: RecipientId,
    ) -> Result<DeliveryOutcome> {
        let trigger: DeliveryTrigger = payload.parse()?;
        self.deliver(&trigger, recipient).await
    }

    pub async fn deliver(
        &self,
        trigger: &DeliveryTrigger,
        recipient: RecipientId,
    ) -> Result<DeliveryOutcome> {
        let DeliveryTrigger { identity, quality } = trigger;

        let Some(record) = self.store.get_release(identity).await? else {
            tracing::debug!(identity = %identity, "Delivery requested for unknown release");
            return Ok(DeliveryOutcome::NotFound);
        };
        let Some(artifact) = record
            .uploaded()
            .find(|(label, _)| *label == quality)
            .map(|(_, handle)| handle.clone())
        else {
            tracing::debug!(identity = %identity, quality = %quality, "Quality not uploaded");
            return Ok(DeliveryOutcome::NotFound);
        };

        if !self
            .store
            .grant_delivery(identity, quality, recipient)
            .await?
        {
            if !self.store.has_delivery(identity, quality, recipient).await? {
                anyhow::bail!(
                    "Grant for {} [{}] to {} refused but not recorded",
                    identity,
                    quality,
                    recipient
                );
            }
            tracing::info!(
                identity = %identity,
                quality = %quality,
                recipient = %recipient,
                "Recipient already received this quality"
            );
            return Ok(DeliveryOutcome::AlreadyReceived {
                fallback_link: self.fallback_link.clone(),
            });
        }

        let caption = format!(
            "{} [{}p]",
            record.title.as_deref().unwrap_or(identity.as_str()),
            quality
        );
        if let Err(e) = self
            .channel
            .send_artifact(recipient, &artifact, &caption)
            .await
        {
            // Compensating revoke: the grant was taken for a send that never
            // happened. Besides the administrative reset, this is the only path
            // that clears a delivery flag.
            if let Err(revoke) = self.store.revoke_delivery(identity, quality, recipient).await {
                tracing::error!(
                    identity = %identity,
                    recipient = %recipient,
                    "Failed to revoke grant after send failure: {}",
                    revoke
                );
            }
            return Err(e.context(format!("Failed to send {} [{}] to {}", identity, quality, recipient)));
        }

        tracing::info!(
            identity = %identity,
            quality = %quality,
            recipient = %recipient,
            "Delivered artifact"
        );
        Ok(DeliveryOutcome::Delivered { artifact })
    }

    /// Remove a grant so the recipient can receive the quality again.
    pub async fn reset(&self, trigger: &DeliveryTrigger, recipient: RecipientId) -> Result<bool> {
        Ok(self
            .store
            .revoke_delivery(&trigger.identity, &trigger.quality, recipient)
            .await?)
    }
}
