//! Answers delivery button presses as they arrive from the channel.

use anyhow::Result;
use releaseforge_common::{PublishPostHandle, RecipientId};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{DeliveryOutcome, DeliveryService};

const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// A delivery button pressed by a recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonPress {
    /// Channel id of the press, used to answer it.
    pub id: String,
    pub payload: String,
    pub recipient: RecipientId,
    /// Post the button is attached to, when the channel reports it.
    pub origin: Option<PublishPostHandle>,
}

/// Where button presses come from and how they are acknowledged.
#[async_trait::async_trait]
pub trait PressSource: Send + Sync {
    fn name(&self) -> &str;

    /// Wait for the next presses. An empty batch is a quiet poll.
    async fn next_presses(&self) -> Result<Vec<ButtonPress>>;

    /// Acknowledge `press` with a short popup.
    async fn answer(&self, press: &ButtonPress, text: &str) -> Result<()>;

    /// Post a notice next to the button of `press`. Returns the notice handle.
    async fn notify(&self, press: &ButtonPress, text: &str) -> Result<String>;

    async fn delete_notice(&self, notice: &str) -> Result<()>;
}

/// Feeds presses from a [`PressSource`] into the [`DeliveryService`].
pub struct DeliveryListener {
    source: Arc<dyn PressSource>,
    service: Arc<DeliveryService>,
    notice_ttl: Option<Duration>,
    error_backoff: Duration,
}

impl DeliveryListener {
    /// `notice_ttl` enables the "file delivered" notice and deletes it after
    /// that long.
    pub fn new(
        source: Arc<dyn PressSource>,
        service: Arc<DeliveryService>,
        notice_ttl: Option<Duration>,
    ) -> Self {
        Self {
            source,
            service,
            notice_ttl,
            error_backoff: ERROR_BACKOFF,
        }
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// Poll for presses until `shutdown` fires. Each press is handled on its
    /// own task so a slow send does not hold up the next poll.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        tracing::info!(source = self.source.name(), "Delivery listener started");

        loop {
            let polled = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                polled = self.source.next_presses() => polled,
            };

            match polled {
                Ok(presses) => {
                    for press in presses {
                        let listener = self.clone();
                        tokio::spawn(async move { listener.handle(&press).await });
                    }
                }
                Err(e) => {
                    tracing::warn!(source = self.source.name(), "Polling for presses failed: {:#}", e);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.error_backoff) => {}
                    }
                }
            }
        }

        tracing::info!("Delivery listener stopped");
    }

    /// Deliver for one press and acknowledge it.
    pub async fn handle(&self, press: &ButtonPress) {
        let outcome = self
            .service
            .handle_trigger(&press.payload, press.recipient)
            .await;

        let answer = match outcome {
            Ok(DeliveryOutcome::Delivered { .. }) => {
                if let Some(ttl) = self.notice_ttl {
                    self.expiring_notice(
                        press,
                        &format!(
                            "✅ File delivered. It will be auto-deleted in {} seconds.",
                            ttl.as_secs()
                        ),
                        ttl,
                    )
                    .await;
                }
                "✅ File sent!".to_string()
            }
            Ok(DeliveryOutcome::AlreadyReceived { fallback_link }) => {
                let text = format!(
                    "🔗 You already received this file.\nHere's the website link: {}",
                    fallback_link
                );
                if let Err(e) = self.source.notify(press, &text).await {
                    tracing::debug!(recipient = %press.recipient, "Fallback notice failed: {:#}", e);
                }
                "You already received this file.".to_string()
            }
            Ok(DeliveryOutcome::NotFound) => "File not found!".to_string(),
            Err(e) => {
                tracing::warn!(
                    recipient = %press.recipient,
                    payload = %press.payload,
                    "Delivery failed: {:#}",
                    e
                );
                format!("Error sending file: {}", e)
            }
        };

        if let Err(e) = self.source.answer(press, &answer).await {
            tracing::debug!(press = %press.id, "Failed to answer press: {:#}", e);
        }
    }

    async fn expiring_notice(&self, press: &ButtonPress, text: &str, ttl: Duration) {
        let notice = match self.source.notify(press, text).await {
            Ok(notice) => notice,
            Err(e) => {
                tracing::debug!(recipient = %press.recipient, "Delivery notice failed: {:#}", e);
                return;
            }
        };

        let source = self.source.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Err(e) = source.delete_notice(&notice).await {
                tracing::debug!(notice = %notice, "Failed to delete notice: {:#}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::LogChannel;
    use crate::store::ReleaseStore;
    use parking_lot::Mutex;
    use releaseforge_common::{ArtifactHandle, Identity, QualityLabel};
    use releaseforge_db::pool::init_memory_pool;
    use std::collections::VecDeque;
    use tokio::sync::Notify;

    /// Hands out scripted batches, then waits forever.
    #[derive(Default)]
    struct ScriptedSource {
        batches: Mutex<VecDeque<Result<Vec<ButtonPress>>>>,
        answers: Mutex<Vec<(String, String)>>,
        notices: Mutex<Vec<String>>,
        deleted: Mutex<Vec<String>>,
        answered: Notify,
    }

    #[async_trait::async_trait]
    impl PressSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn next_presses(&self) -> Result<Vec<ButtonPress>> {
            let next = self.batches.lock().pop_front();
            match next {
                Some(batch) => batch,
                None => std::future::pending().await,
            }
        }

        async fn answer(&self, press: &ButtonPress, text: &str) -> Result<()> {
            self.answers.lock().push((press.id.clone(), text.to_string()));
            self.answered.notify_one();
            Ok(())
        }

        async fn notify(&self, _press: &ButtonPress, text: &str) -> Result<String> {
            let mut notices = self.notices.lock();
            notices.push(text.to_string());
            Ok(format!("notice-{}", notices.len()))
        }

        async fn delete_notice(&self, notice: &str) -> Result<()> {
            self.deleted.lock().push(notice.to_string());
            Ok(())
        }
    }

    fn press(id: &str, payload: &str) -> ButtonPress {
        ButtonPress {
            id: id.to_string(),
            payload: payload.to_string(),
            recipient: RecipientId::new(42),
            origin: None,
        }
    }

    async fn service() -> Arc<DeliveryService> {
        let store = ReleaseStore::new(init_memory_pool().unwrap());
        store
            .upsert_quality(
                &Identity::new("series-a:5"),
                &QualityLabel::new("720"),
                &ArtifactHandle::new("https://cdn/a-720.mkv"),
                None,
                false,
            )
            .await
            .unwrap();
        Arc::new(DeliveryService::new(
            store,
            Arc::new(LogChannel::new()),
            "https://site/series-a",
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_press_delivers_and_notice_expires() {
        let source = Arc::new(ScriptedSource::default());
        let listener = DeliveryListener::new(
            source.clone(),
            service().await,
            Some(Duration::from_secs(60)),
        );

        listener.handle(&press("cb-1", "deliver|series-a:5|720")).await;
        assert_eq!(
            *source.answers.lock(),
            vec![("cb-1".to_string(), "✅ File sent!".to_string())]
        );
        assert_eq!(source.notices.lock().len(), 1);
        assert!(source.notices.lock()[0].contains("auto-deleted in 60 seconds"));

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(source.deleted.lock().is_empty());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(*source.deleted.lock(), vec!["notice-1".to_string()]);
    }

    #[tokio::test]
    async fn test_second_press_gets_fallback_link() {
        let source = Arc::new(ScriptedSource::default());
        let listener = DeliveryListener::new(source.clone(), service().await, None);

        listener.handle(&press("cb-1", "deliver|series-a:5|720")).await;
        listener.handle(&press("cb-2", "deliver|series-a:5|720")).await;

        let notices = source.notices.lock().clone();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].contains("https://site/series-a"));
        assert_eq!(source.answers.lock()[1].1, "You already received this file.");
    }

    #[tokio::test]
    async fn test_unknown_quality_and_bad_payload_are_answered() {
        let source = Arc::new(ScriptedSource::default());
        let listener = DeliveryListener::new(source.clone(), service().await, None);

        listener.handle(&press("cb-1", "deliver|series-a:5|1080")).await;
        listener.handle(&press("cb-2", "garbage")).await;

        let answers = source.answers.lock().clone();
        assert_eq!(answers[0].1, "File not found!");
        assert!(answers[1].1.starts_with("Error sending file"));
        assert!(source.notices.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_survives_poll_errors_and_stops_on_shutdown() {
        let source = Arc::new(ScriptedSource::default());
        {
            let mut batches = source.batches.lock();
            batches.push_back(Err(anyhow::anyhow!("connection reset")));
            batches.push_back(Ok(vec![press("cb-1", "deliver|series-a:5|720")]));
        }
        let listener = Arc::new(
            DeliveryListener::new(source.clone(), service().await, None)
                .with_error_backoff(Duration::from_secs(1)),
        );

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(listener.run(shutdown.clone()));

        source.answered.notified().await;
        assert_eq!(source.answers.lock()[0].1, "✅ File sent!");

        shutdown.cancel();
        task.await.unwrap();
    }
}
