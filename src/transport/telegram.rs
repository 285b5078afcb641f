//! Telegram Bot API transport.
//!
//! A thin shim over the HTTP API: `getUpdates` long-polling with offset
//! tracking, `sendMessage`, `editMessageText`, and `deleteMessage`.
//! Rate-limit responses (`retry_after`) are honored with a single retry;
//! other failures surface as `AppError::Transport`. Messages are sent as
//! plain text — entity formatting is out of scope.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::TelegramConfig;
use crate::transport::{
    IncomingMessage, MessageRef, RenderedMessage, ReplyContext, SendOptions, ThreadKey, Transport,
};
use crate::{AppError, Result};

/// Server-side long-poll window.
const POLL_WINDOW_SECS: u64 = 30;
/// Client-side timeout for a long-poll request (window + slack).
const POLL_TIMEOUT: Duration = Duration::from_secs(40);
/// Client-side timeout for ordinary calls.
const CALL_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TelegramTransport {
    http: reqwest::Client,
    base_url: String,
    offset: AtomicI64,
}

impl TelegramTransport {
    /// Build the transport from config; the bot token must be loaded.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the bot token is empty, or
    /// `AppError::Transport` if the HTTP client cannot be built.
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        if config.bot_token.is_empty() {
            return Err(AppError::Config(
                "telegram bot token is not loaded; set TELEGRAM_BOT_TOKEN or the keychain entry"
                    .into(),
            ));
        }
        let http = reqwest::Client::builder()
            .build()
            .map_err(|err| AppError::Transport(format!("failed to build http client: {err}")))?;
        Ok(Self {
            http,
            base_url: format!("https://api.telegram.org/bot{}", config.bot_token),
            offset: AtomicI64::new(0),
        })
    }

    /// POST one Bot API method, honoring `retry_after` once.
    async fn call(
        &self,
        method: &str,
        payload: &serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        let url = format!("{}/{method}", self.base_url);
        let mut attempts = 0u8;
        loop {
            attempts += 1;
            let response = self
                .http
                .post(&url)
                .timeout(timeout)
                .json(payload)
                .send()
                .await
                .map_err(|err| AppError::Transport(format!("{method} failed: {err}")))?;
            let envelope: ApiEnvelope = response
                .json()
                .await
                .map_err(|err| AppError::Transport(format!("{method}: invalid response: {err}")))?;

            if envelope.ok {
                return Ok(envelope.result.unwrap_or(serde_json::Value::Null));
            }

            let description = envelope
                .description
                .unwrap_or_else(|| "unknown telegram error".into());
            let retry_after = envelope.parameters.and_then(|p| p.retry_after);
            if let Some(seconds) = retry_after {
                if attempts == 1 {
                    warn!(method, seconds, "telegram rate limited, retrying once");
                    tokio::time::sleep(Duration::from_secs(seconds)).await;
                    continue;
                }
            }
            return Err(AppError::Transport(format!("{method}: {description}")));
        }
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send(
        &self,
        thread: ThreadKey,
        message: &RenderedMessage,
        opts: SendOptions,
    ) -> Result<MessageRef> {
        let mut payload = json!({
            "chat_id": thread.chat_id,
            "text": message.text,
            "disable_notification": opts.silent,
        });
        if let Some(topic_id) = thread.topic_id {
            payload["message_thread_id"] = json!(topic_id);
        }
        if let Some(reply_to) = opts.reply_to {
            payload["reply_to_message_id"] = json!(reply_to);
            payload["allow_sending_without_reply"] = json!(true);
        }
        let result = self.call("sendMessage", &payload, CALL_TIMEOUT).await?;
        let message_id = result
            .get("message_id")
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| AppError::Transport("sendMessage: missing message_id".into()))?;
        Ok(MessageRef {
            chat_id: thread.chat_id,
            message_id,
        })
    }

    async fn edit(&self, message: &MessageRef, rendered: &RenderedMessage) -> Result<()> {
        let payload = json!({
            "chat_id": message.chat_id,
            "message_id": message.message_id,
            "text": rendered.text,
        });
        match self.call("editMessageText", &payload, CALL_TIMEOUT).await {
            Ok(_) => Ok(()),
            // Editing to identical content is not an error worth surfacing.
            Err(AppError::Transport(ref description))
                if description.contains("message is not modified") =>
            {
                debug!(message = %message, "edit skipped: content unchanged");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn delete(&self, message: &MessageRef) -> Result<()> {
        let payload = json!({
            "chat_id": message.chat_id,
            "message_id": message.message_id,
        });
        self.call("deleteMessage", &payload, CALL_TIMEOUT).await?;
        Ok(())
    }

    async fn poll(&self) -> Result<Vec<IncomingMessage>> {
        let payload = json!({
            "offset": self.offset.load(Ordering::SeqCst),
            "timeout": POLL_WINDOW_SECS,
            "allowed_updates": ["message"],
        });
        let result = self.call("getUpdates", &payload, POLL_TIMEOUT).await?;
        let updates: Vec<Update> = serde_json::from_value(result)
            .map_err(|err| AppError::Transport(format!("getUpdates: invalid payload: {err}")))?;

        let mut incoming = Vec::new();
        for update in updates {
            self.offset
                .fetch_max(update.update_id + 1, Ordering::SeqCst);
            let Some(message) = update.message else {
                continue;
            };
            let Some(text) = message.text else {
                continue;
            };
            incoming.push(IncomingMessage {
                thread: ThreadKey {
                    chat_id: message.chat.id,
                    topic_id: message.message_thread_id,
                },
                message_id: message.message_id,
                text,
                reply: message.reply_to_message.map(|reply| ReplyContext {
                    message_id: reply.message_id,
                    text: reply.text,
                }),
            });
        }
        Ok(incoming)
    }
}

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    ok: bool,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
    chat: Chat,
    #[serde(default)]
    message_thread_id: Option<i64>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    reply_to_message: Option<RepliedMessage>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct RepliedMessage {
    message_id: i64,
    #[serde(default)]
    text: Option<String>,
}
