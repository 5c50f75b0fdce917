//! Chat transport abstraction
//!
//! The dispatch engine talks to Telegram only through [`ChatTransport`], so
//! the whole reply cycle can run against an in-memory transport in tests.

mod telegram;
mod update;

pub use telegram::TelegramTransport;
pub use update::{DocumentRef, InboundMessage, TelegramUser, UpdateKind};

use async_trait::async_trait;

/// Telegram message id within a chat
pub type MessageId = i32;

/// How the platform should interpret markup sentinels in outgoing text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkupMode {
    /// Legacy Markdown (`*bold*`, `_italic_`, `` `code` ``, fences)
    Rich,
    /// No parse mode; text shown as-is
    Plain,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Platform could not parse the markup in the text
    #[error("markup rejected: {0}")]
    MarkupRejected(String),

    /// Edit target already has this exact content
    #[error("message is not modified")]
    NotModified,

    #[error("request failed: {0}")]
    Request(String),
}

/// Outbound operations against the chat platform
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str, mode: MarkupMode) -> Result<MessageId, TransportError>;

    async fn edit_text(
        &self,
        chat_id: i64,
        message_id: MessageId,
        text: &str,
        mode: MarkupMode,
    ) -> Result<(), TransportError>;

    async fn delete_message(&self, chat_id: i64, message_id: MessageId) -> Result<(), TransportError>;

    async fn send_typing(&self, chat_id: i64) -> Result<(), TransportError>;

    /// "Sending a file" indicator shown while a document is processed
    async fn send_upload_document(&self, chat_id: i64) -> Result<(), TransportError>;

    /// Send a photo by URL; the platform fetches it
    async fn send_photo(&self, chat_id: i64, url: &str, caption: &str) -> Result<MessageId, TransportError>;

    /// Fetch the bytes of an uploaded file
    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, TransportError>;
}
