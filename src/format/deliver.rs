//! Chunk delivery with markup fallback
//!
//! Per chunk: Markdown → same text without parse mode (only after a markup
//! rejection) → sentinels stripped. Single-chunk replies edit the placeholder
//! in place, falling back to a new message when the edit itself fails;
//! multi-chunk replies delete it and send each part as a new message.

use std::time::Duration;
use tracing::{debug, warn};

use super::{chunk, sanitize, strip_markup, MessageChunk, DEFAULT_CHUNK_LIMIT};
use crate::transport::{ChatTransport, MarkupMode, MessageId, TransportError};

/// Pause between parts so Telegram keeps them in order
const CHUNK_PAUSE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy)]
enum Target {
    New,
    Edit(MessageId),
}

/// Sanitizes, chunks, and delivers replies
#[derive(Debug, Clone)]
pub struct ReplyFormatter {
    limit: usize,
}

impl ReplyFormatter {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Sanitize and split without sending
    pub fn prepare(&self, text: &str) -> Vec<MessageChunk> {
        chunk(&sanitize(text), self.limit)
    }

    /// Deliver `text` to a chat, replacing `placeholder` if given.
    ///
    /// Returns the number of parts delivered. Only a failure of the last
    /// fallback tier is returned as an error.
    pub async fn deliver(
        &self,
        transport: &dyn ChatTransport,
        chat_id: i64,
        placeholder: Option<MessageId>,
        text: &str,
    ) -> Result<usize, TransportError> {
        let chunks = self.prepare(text);

        if let [only] = chunks.as_slice() {
            let target = placeholder.map(Target::Edit).unwrap_or(Target::New);
            self.send_chunk(transport, chat_id, target, &only.render()).await?;
            return Ok(1);
        }

        if let Some(id) = placeholder {
            if let Err(e) = transport.delete_message(chat_id, id).await {
                warn!("Failed to delete placeholder {} in chat {}: {}", id, chat_id, e);
            }
        }

        let total = chunks.len();
        debug!("Delivering {} parts to chat {}", total, chat_id);
        for (i, part) in chunks.iter().enumerate() {
            self.send_chunk(transport, chat_id, Target::New, &part.render()).await?;
            if i + 1 < total {
                tokio::time::sleep(CHUNK_PAUSE).await;
            }
        }
        Ok(total)
    }

    /// Deliver one body to `target`. An edit that fails for reasons other
    /// than markup is retried as a new message.
    async fn send_chunk(
        &self,
        transport: &dyn ChatTransport,
        chat_id: i64,
        target: Target,
        body: &str,
    ) -> Result<(), TransportError> {
        match self.send_with_fallback(transport, chat_id, target, body).await {
            Err(e) if matches!(target, Target::Edit(_)) => {
                warn!("Editing placeholder in chat {} failed, sending new message: {}", chat_id, e);
                self.send_with_fallback(transport, chat_id, Target::New, body).await
            }
            other => other,
        }
    }

    async fn send_with_fallback(
        &self,
        transport: &dyn ChatTransport,
        chat_id: i64,
        target: Target,
        body: &str,
    ) -> Result<(), TransportError> {
        match attempt(transport, chat_id, target, body, MarkupMode::Rich).await {
            Ok(()) => return Ok(()),
            Err(TransportError::MarkupRejected(e)) => {
                debug!("Markdown rejected for chat {}, trying plain text: {}", chat_id, e)
            }
            Err(e) => return Err(e),
        }

        match attempt(transport, chat_id, target, body, MarkupMode::Plain).await {
            Ok(()) => return Ok(()),
            Err(e) => warn!("Plain send failed for chat {}, stripping markup: {}", chat_id, e),
        }

        let stripped = strip_markup(body);
        attempt(transport, chat_id, target, &stripped, MarkupMode::Plain)
            .await
            .inspect_err(|e| warn!("Stripped send failed for chat {}: {}", chat_id, e))
    }
}

impl Default for ReplyFormatter {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_LIMIT)
    }
}

async fn attempt(
    transport: &dyn ChatTransport,
    chat_id: i64,
    target: Target,
    text: &str,
    mode: MarkupMode,
) -> Result<(), TransportError> {
    match target {
        Target::New => transport.send_text(chat_id, text, mode).await.map(|_| ()),
        Target::Edit(id) => match transport.edit_text(chat_id, id, text, mode).await {
            Err(TransportError::NotModified) => Ok(()),
            other => other,
        },
    }
}
