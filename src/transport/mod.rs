//! Transport capability interface and message types.
//!
//! A transport is a thin shim over one chat backend: send, edit, delete,
//! and long-poll. Implementations must be safe for concurrent use; the
//! bridge treats the transport as a single shared sink.

pub mod telegram;

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::TakopiConfig;
use crate::{AppError, Result};

/// Conversational context identified by the transport.
///
/// For Telegram this is the chat id plus the optional forum topic id.
/// Not an OS thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ThreadKey {
    pub chat_id: i64,
    pub topic_id: Option<i64>,
}

impl ThreadKey {
    #[must_use]
    pub fn chat(chat_id: i64) -> Self {
        Self {
            chat_id,
            topic_id: None,
        }
    }
}

impl Display for ThreadKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.topic_id {
            Some(topic) => write!(f, "{}/{topic}", self.chat_id),
            None => write!(f, "{}", self.chat_id),
        }
    }
}

/// Transport-agnostic handle to a sent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MessageRef {
    pub chat_id: i64,
    pub message_id: i64,
}

impl Display for MessageRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.chat_id, self.message_id)
    }
}

/// Opaque presentation output produced by the presenter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub text: String,
}

impl RenderedMessage {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Delivery options for [`Transport::send`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    /// Suppress the recipient-side notification.
    pub silent: bool,
    /// Send as a reply to this message id.
    pub reply_to: Option<i64>,
}

/// The replied-to message, as far as routing needs it.
#[derive(Debug, Clone)]
pub struct ReplyContext {
    pub message_id: i64,
    pub text: Option<String>,
}

/// One message received from the transport.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub thread: ThreadKey,
    pub message_id: i64,
    pub text: String,
    pub reply: Option<ReplyContext>,
}

/// Chat backend shim.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a new message; returns a handle usable for edit/delete.
    async fn send(
        &self,
        thread: ThreadKey,
        message: &RenderedMessage,
        opts: SendOptions,
    ) -> Result<MessageRef>;

    /// Replace the text of a previously sent message.
    async fn edit(&self, message: &MessageRef, rendered: &RenderedMessage) -> Result<()>;

    /// Delete a previously sent message.
    async fn delete(&self, message: &MessageRef) -> Result<()>;

    /// Long-poll for the next batch of incoming messages.
    async fn poll(&self) -> Result<Vec<IncomingMessage>>;
}

/// Construct the transport selected by `id`.
///
/// # Errors
///
/// Returns `AppError::Config` for unknown transport ids or incomplete
/// transport configuration.
pub fn build_transport(id: &str, config: &TakopiConfig) -> Result<Arc<dyn Transport>> {
    match id {
        "telegram" => Ok(Arc::new(telegram::TelegramTransport::new(
            &config.telegram,
        )?)),
        other => Err(AppError::Config(format!(
            "unknown transport {other:?}; available: telegram"
        ))),
    }
}
