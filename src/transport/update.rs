//! Platform-neutral view of an incoming message

/// Sender identity as reported by Telegram
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TelegramUser {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub is_bot: bool,
    pub language_code: Option<String>,
}

impl TelegramUser {
    /// First and last name joined
    pub fn display_name(&self) -> String {
        match &self.last_name {
            Some(last) if !last.is_empty() => format!("{} {}", self.first_name, last),
            _ => self.first_name.clone(),
        }
    }
}

/// Uploaded file reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub file_id: String,
    pub file_name: Option<String>,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateKind {
    /// `/name args`; the name is lowercased and any `@botname` suffix dropped
    Command { name: String, args: String },
    Text(String),
    Document(DocumentRef),
    /// Stickers, photos, voice and anything else
    Unsupported,
}

impl UpdateKind {
    /// Classify message text as a command or plain text
    pub fn from_text(text: &str) -> Self {
        let Some(rest) = text.strip_prefix('/') else {
            return Self::Text(text.to_string());
        };

        let (head, args) = match rest.split_once(char::is_whitespace) {
            Some((head, args)) => (head, args.trim()),
            None => (rest, ""),
        };
        let name = head.split('@').next().unwrap_or_default();

        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Self::Text(text.to_string());
        }

        Self::Command {
            name: name.to_ascii_lowercase(),
            args: args.to_string(),
        }
    }
}

/// One inbound update, reduced to what the dispatcher needs
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub chat_id: i64,
    pub sender: Option<TelegramUser>,
    pub kind: UpdateKind,
}

impl InboundMessage {
    pub fn text(chat_id: i64, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            chat_id,
            sender: None,
            kind: UpdateKind::from_text(&text),
        }
    }

    pub fn with_sender(mut self, sender: TelegramUser) -> Self {
        self.sender = Some(sender);
        self
    }
}
