//! teloxide-backed transport

use async_trait::async_trait;
use teloxide::{
    net::Download,
    prelude::*,
    types::{ChatAction, InputFile, MessageId as TgMessageId, ParseMode},
    ApiError, RequestError,
};

use super::{ChatTransport, DocumentRef, InboundMessage, MarkupMode, MessageId, TelegramUser, TransportError, UpdateKind};

/// [`ChatTransport`] over the Telegram Bot API
#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }
}

fn classify(err: RequestError) -> TransportError {
    match err {
        RequestError::Api(ApiError::CantParseEntities(detail)) => TransportError::MarkupRejected(detail),
        RequestError::Api(ApiError::MessageNotModified) => TransportError::NotModified,
        other => TransportError::Request(other.to_string()),
    }
}

// Legacy Markdown matches the `*bold*` / `_italic_` syntax the provider emits.
#[allow(deprecated)]
fn parse_mode(mode: MarkupMode) -> Option<ParseMode> {
    match mode {
        MarkupMode::Rich => Some(ParseMode::Markdown),
        MarkupMode::Plain => None,
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_text(&self, chat_id: i64, text: &str, mode: MarkupMode) -> Result<MessageId, TransportError> {
        let mut request = self.bot.send_message(ChatId(chat_id), text);
        if let Some(pm) = parse_mode(mode) {
            request = request.parse_mode(pm);
        }
        request.await.map(|msg| msg.id.0).map_err(classify)
    }

    async fn edit_text(
        &self,
        chat_id: i64,
        message_id: MessageId,
        text: &str,
        mode: MarkupMode,
    ) -> Result<(), TransportError> {
        let mut request = self
            .bot
            .edit_message_text(ChatId(chat_id), TgMessageId(message_id), text);
        if let Some(pm) = parse_mode(mode) {
            request = request.parse_mode(pm);
        }
        request.await.map(|_| ()).map_err(classify)
    }

    async fn delete_message(&self, chat_id: i64, message_id: MessageId) -> Result<(), TransportError> {
        self.bot
            .delete_message(ChatId(chat_id), TgMessageId(message_id))
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn send_typing(&self, chat_id: i64) -> Result<(), TransportError> {
        self.bot
            .send_chat_action(ChatId(chat_id), ChatAction::Typing)
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn send_upload_document(&self, chat_id: i64) -> Result<(), TransportError> {
        self.bot
            .send_chat_action(ChatId(chat_id), ChatAction::UploadDocument)
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn send_photo(&self, chat_id: i64, url: &str, caption: &str) -> Result<MessageId, TransportError> {
        let url = reqwest::Url::parse(url).map_err(|e| TransportError::Request(format!("invalid photo url: {}", e)))?;
        self.bot
            .send_photo(ChatId(chat_id), InputFile::url(url))
            .caption(caption)
            .await
            .map(|msg| msg.id.0)
            .map_err(classify)
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, TransportError> {
        let file = self
            .bot
            .get_file(file_id.to_string())
            .await
            .map_err(classify)?;

        let mut buf = Vec::new();
        self.bot
            .download_file(&file.path, &mut buf)
            .await
            .map_err(|e| TransportError::Request(format!("download failed: {}", e)))?;
        Ok(buf)
    }
}

impl From<&teloxide::types::User> for TelegramUser {
    fn from(user: &teloxide::types::User) -> Self {
        Self {
            id: user.id.0 as i64,
            username: user.username.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            is_bot: user.is_bot,
            language_code: user.language_code.clone(),
        }
    }
}

impl From<&Message> for InboundMessage {
    fn from(msg: &Message) -> Self {
        let kind = if let Some(text) = msg.text() {
            UpdateKind::from_text(text)
        } else if let Some(doc) = msg.document() {
            UpdateKind::Document(DocumentRef {
                file_id: doc.file.id.clone(),
                file_name: doc.file_name.clone(),
                caption: msg.caption().map(str::to_string),
            })
        } else {
            UpdateKind::Unsupported
        };

        Self {
            chat_id: msg.chat.id.0,
            sender: msg.from.as_ref().map(TelegramUser::from),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(body: serde_json::Value) -> Message {
        let mut value = json!({
            "message_id": 42,
            "date": 1_700_000_000,
            "chat": {"id": 555, "type": "private", "first_name": "Ada"},
            "from": {"id": 7, "is_bot": false, "first_name": "Ada", "username": "ada_l", "language_code": "en"}
        });
        if let (Some(target), Some(extra)) = (value.as_object_mut(), body.as_object()) {
            target.extend(extra.clone());
        }
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_document_message_keeps_file_id() {
        let msg = message(json!({
            "document": {
                "file_id": "BQACAgIAAxkBAAIB",
                "file_unique_id": "AgADBAAC",
                "file_size": 2048,
                "file_name": "lecture.pdf"
            },
            "caption": "week 3"
        }));

        let inbound = InboundMessage::from(&msg);
        assert_eq!(inbound.chat_id, 555);
        match inbound.kind {
            UpdateKind::Document(doc) => {
                assert_eq!(doc.file_id, "BQACAgIAAxkBAAIB");
                assert_eq!(doc.file_name.as_deref(), Some("lecture.pdf"));
                assert_eq!(doc.caption.as_deref(), Some("week 3"));
            }
            other => panic!("expected document, got {:?}", other),
        }
    }

    #[test]
    fn test_text_message_sender() {
        let inbound = InboundMessage::from(&message(json!({"text": "/clear@relay_bot"})));

        let sender = inbound.sender.unwrap();
        assert_eq!(sender.id, 7);
        assert_eq!(sender.username.as_deref(), Some("ada_l"));
        assert_eq!(
            inbound.kind,
            UpdateKind::Command {
                name: "clear".into(),
                args: String::new()
            }
        );
    }
}
