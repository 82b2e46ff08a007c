use anyhow::{Context, Result};
use dashmap::DashMap;
use releaseforge_common::{ArtifactHandle, Identity, PublishPostHandle, RecipientId};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use super::{announcement_text, NotificationChannel, ReleaseAnnouncement};
use crate::config::TelegramConfig;
use crate::delivery::{ButtonPress, PressSource};

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Bot API limit on inline button callback data.
const MAX_CALLBACK_BYTES: usize = 64;

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    id: String,
    from: Sender,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Sender {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
    chat: Chat,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

/// Telegram Bot API channel.
///
/// Release posts go to the main channel; status lines and alerts go to the
/// log channel when one is configured. Release post handles are
/// `<chat_id>:<message_id>`.
///
/// As a [`PressSource`] it long-polls `getUpdates` for presses of the
/// delivery buttons it attached to release posts.
pub struct TelegramChannel {
    client: Client,
    base_url: String,
    main_channel: i64,
    log_channel: Option<i64>,
    status_messages: DashMap<String, i64>,
    poll_timeout: Duration,
    next_update: AtomicI64,
}

impl TelegramChannel {
    pub fn new(config: &TelegramConfig) -> Self {
        let client = Client::builder()
            .timeout(CONNECTION_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client: {}", e);
                Client::new()
            });

        Self {
            client,
            base_url: format!(
                "{}/bot{}",
                config.api_base.trim_end_matches('/'),
                config.bot_token
            ),
            main_channel: config.main_channel,
            log_channel: config.log_channel,
            status_messages: DashMap::new(),
            poll_timeout: config.poll_timeout(),
            next_update: AtomicI64::new(0),
        }
    }

    async fn call(&self, method: &str, body: Value) -> Result<Value> {
        self.call_with_timeout(method, body, CONNECTION_TIMEOUT).await
    }

    async fn call_with_timeout(&self, method: &str, body: Value, timeout: Duration) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, method);

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Telegram {} request failed", method))?;

        let status = response.status();
        let parsed: ApiResponse = response
            .json()
            .await
            .with_context(|| format!("Telegram {} returned an unreadable body ({})", method, status))?;

        if !parsed.ok {
            anyhow::bail!(
                "Telegram {} failed ({}): {}",
                method,
                status,
                parsed.description.unwrap_or_default()
            );
        }

        Ok(parsed.result.unwrap_or(Value::Null))
    }

    async fn send_message(&self, chat_id: i64, text: &str, markup: Option<Value>) -> Result<i64> {
        let mut body = json!({ "chat_id": chat_id, "text": text });
        if let Some(markup) = markup {
            body["reply_markup"] = markup;
        }

        let result = self.call("sendMessage", body).await?;
        result
            .get("message_id")
            .and_then(Value::as_i64)
            .context("sendMessage result has no message_id")
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        markup: Option<Value>,
    ) -> Result<()> {
        let mut body = json!({ "chat_id": chat_id, "message_id": message_id, "text": text });
        if let Some(markup) = markup {
            body["reply_markup"] = markup;
        }

        self.call("editMessageText", body).await.map(|_| ())
    }
}

fn parse_post_handle(handle: &PublishPostHandle) -> Result<(i64, i64)> {
    let (chat, message) = handle
        .as_str()
        .rsplit_once(':')
        .with_context(|| format!("Malformed Telegram post handle {:?}", handle.as_str()))?;
    Ok((chat.parse()?, message.parse()?))
}

fn delivery_keyboard(announcement: &ReleaseAnnouncement) -> Value {
    let buttons: Vec<Value> = announcement
        .triggers()
        .into_iter()
        .map(|(quality, trigger)| {
            let payload = trigger.payload();
            if payload.len() > MAX_CALLBACK_BYTES {
                tracing::warn!(
                    payload = %payload,
                    "Delivery payload exceeds the callback data limit"
                );
            }
            json!({ "text": format!("{}p", quality), "callback_data": payload })
        })
        .collect();

    json!({ "inline_keyboard": [buttons] })
}

#[async_trait::async_trait]
impl NotificationChannel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn post_status(&self, topic: &str, text: &str) -> Result<()> {
        let Some(chat) = self.log_channel else {
            tracing::debug!(topic, "{}", text);
            return Ok(());
        };

        let existing = self.status_messages.get(topic).map(|m| *m);
        match existing {
            Some(message_id) => self.edit_message(chat, message_id, text, None).await,
            None => {
                let message_id = self.send_message(chat, text, None).await?;
                self.status_messages.insert(topic.to_string(), message_id);
                Ok(())
            }
        }
    }

    async fn end_status(&self, topic: &str) {
        self.status_messages.remove(topic);
    }

    async fn create_release_post(
        &self,
        identity: &Identity,
        title: &str,
    ) -> Result<PublishPostHandle> {
        let announcement = ReleaseAnnouncement {
            identity: identity.clone(),
            title: title.to_string(),
            qualities: Vec::new(),
        };
        let message_id = self
            .send_message(self.main_channel, &announcement_text(&announcement), None)
            .await?;

        Ok(PublishPostHandle::new(format!(
            "{}:{}",
            self.main_channel, message_id
        )))
    }

    async fn post_release(
        &self,
        post: &PublishPostHandle,
        announcement: &ReleaseAnnouncement,
    ) -> Result<()> {
        let (chat, message_id) = parse_post_handle(post)?;
        self.edit_message(
            chat,
            message_id,
            &announcement_text(announcement),
            Some(delivery_keyboard(announcement)),
        )
        .await
    }

    async fn alert(&self, text: &str) -> Result<()> {
        let chat = self.log_channel.unwrap_or(self.main_channel);
        self.send_message(chat, &format!("⚠️ {}", text), None)
            .await
            .map(|_| ())
    }

    async fn send_artifact(
        &self,
        recipient: RecipientId,
        artifact: &ArtifactHandle,
        caption: &str,
    ) -> Result<()> {
        self.call(
            "sendDocument",
            json!({
                "chat_id": recipient.get(),
                "document": artifact.as_str(),
                "caption": caption,
            }),
        )
        .await
        .map(|_| ())
    }
}

/// Turn callback updates into presses of our delivery buttons.
fn presses_from(updates: Vec<Update>) -> Vec<ButtonPress> {
    updates
        .into_iter()
        .filter_map(|update| {
            let query = update.callback_query?;
            let payload = query.data?;
            Some(ButtonPress {
                id: query.id,
                payload,
                recipient: RecipientId::new(query.from.id),
                origin: query.message.map(|m| {
                    PublishPostHandle::new(format!("{}:{}", m.chat.id, m.message_id))
                }),
            })
        })
        .collect()
}

#[async_trait::async_trait]
impl PressSource for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn next_presses(&self) -> Result<Vec<ButtonPress>> {
        let offset = self.next_update.load(Ordering::SeqCst);
        let result = self
            .call_with_timeout(
                "getUpdates",
                json!({
                    "offset": offset,
                    "timeout": self.poll_timeout.as_secs(),
                    "allowed_updates": ["callback_query"],
                }),
                self.poll_timeout + CONNECTION_TIMEOUT,
            )
            .await?;

        let updates: Vec<Update> =
            serde_json::from_value(result).context("getUpdates returned unexpected updates")?;
        if let Some(last) = updates.iter().map(|u| u.update_id).max() {
            self.next_update.fetch_max(last + 1, Ordering::SeqCst);
        }

        Ok(presses_from(updates))
    }

    async fn answer(&self, press: &ButtonPress, text: &str) -> Result<()> {
        self.call(
            "answerCallbackQuery",
            json!({ "callback_query_id": press.id, "text": text, "show_alert": true }),
        )
        .await
        .map(|_| ())
    }

    async fn notify(&self, press: &ButtonPress, text: &str) -> Result<String> {
        let (chat, message_id) = match &press.origin {
            Some(origin) => {
                let (chat, message_id) = parse_post_handle(origin)?;
                (chat, Some(message_id))
            }
            None => (press.recipient.get(), None),
        };

        let mut body = json!({ "chat_id": chat, "text": text });
        if let Some(message_id) = message_id {
            body["reply_to_message_id"] = json!(message_id);
        }

        let result = self.call("sendMessage", body).await?;
        let sent = result
            .get("message_id")
            .and_then(Value::as_i64)
            .context("sendMessage result has no message_id")?;
        Ok(format!("{}:{}", chat, sent))
    }

    async fn delete_notice(&self, notice: &str) -> Result<()> {
        let (chat, message_id) = parse_post_handle(&PublishPostHandle::new(notice))?;
        self.call(
            "deleteMessage",
            json!({ "chat_id": chat, "message_id": message_id }),
        )
        .await
        .map(|_| ())
    }
}
