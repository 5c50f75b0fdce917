//! Dispatch Engine
//!
//! Routes each inbound update to a handler and drives the reply cycle for
//! free text:
//!
//! ```text
//! Received ──▶ Pending ──▶ ResolvedSuccess ──▶ Delivered
//!                    └───▶ ResolvedFailure ──┘
//! ```
//!
//! The chat's session lock is held from the user-turn append until the reply
//! is delivered, so each chat has at most one provider call in flight.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::documents::{DocumentKind, OfficeExtractor, TextExtractor};
use crate::error::{RelayError, Result};
use crate::format::ReplyFormatter;
use crate::lookups::Lookups;
use crate::prompts;
use crate::provider::ResilientClient;
use crate::session::{Role, SessionStore, Turn};
use crate::store::{MessageStore, StoredMessage, UserStore};
use crate::transport::{ChatTransport, DocumentRef, InboundMessage, MarkupMode, MessageId, TelegramUser, TransportError, UpdateKind};

pub const THINKING_TEXT: &str = "Thinking...";
pub const APOLOGY_TEXT: &str = "Sorry, I'm having trouble processing your request. Please try again later.";
pub const UNSUPPORTED_TEXT: &str = "I only support text messages, documents, and commands for now.";
pub const UNSUPPORTED_FORMAT_TEXT: &str = "Supported formats: PDF and PPTX files only";
pub const GUIDE_PROGRESS_TEXT: &str = "Creating Educational Guide...";
pub const GUIDE_FAILED_TEXT: &str = "Failed to generate guide. Please try again later.";
pub const CLEARED_TEXT: &str = "Conversation history cleared!";
pub const UNKNOWN_COMMAND_TEXT: &str = "Unknown command. Use /help to see available commands.";

pub const HELP_TEXT: &str = "Commands:
/help - Show this help message
/clear - Clear conversation history (the AI forgets all messages)
/profile - Show your profile information
/stats - Show your usage statistics
/weather <city> - Current weather for a city
/pitch <idea> - Short pitch deck for a startup idea
/photo <topic> - Random photo of a topic
/image <prompt> - AI-generated image

Send a PDF or PPTX file to get a study guide.";

const PITCH_PROGRESS_TEXT: &str = "Generating your pitch, please wait...";

/// Where a reply cycle is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Received,
    Pending,
    ResolvedSuccess,
    ResolvedFailure,
    Delivered,
}

impl Phase {
    fn can_advance_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Received, Phase::Pending)
                | (Phase::Pending, Phase::ResolvedSuccess)
                | (Phase::Pending, Phase::ResolvedFailure)
                | (Phase::ResolvedSuccess, Phase::Delivered)
                | (Phase::ResolvedFailure, Phase::Delivered)
        )
    }
}

/// State of one free-text reply
#[derive(Debug)]
pub struct ReplyCycle {
    chat_id: i64,
    placeholder_id: MessageId,
    phase: Phase,
}

impl ReplyCycle {
    pub fn new(chat_id: i64, placeholder_id: MessageId) -> Self {
        Self {
            chat_id,
            placeholder_id,
            phase: Phase::Received,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn placeholder_id(&self) -> MessageId {
        self.placeholder_id
    }

    /// Move to `next`; illegal transitions are ignored
    pub fn advance(&mut self, next: Phase) -> bool {
        if !self.phase.can_advance_to(next) {
            warn!(
                "Ignoring reply cycle transition {:?} -> {:?} in chat {}",
                self.phase, next, self.chat_id
            );
            return false;
        }
        debug!("Chat {}: {:?} -> {:?}", self.chat_id, self.phase, next);
        self.phase = next;
        true
    }
}

/// Routes updates and runs reply cycles
pub struct DispatchEngine {
    transport: Arc<dyn ChatTransport>,
    sessions: Arc<SessionStore>,
    client: ResilientClient,
    pitch_client: Option<ResilientClient>,
    formatter: ReplyFormatter,
    users: Option<Arc<dyn UserStore>>,
    messages: Option<Arc<dyn MessageStore>>,
    lookups: Option<Arc<dyn Lookups>>,
    extractor: Arc<dyn TextExtractor>,
}

impl DispatchEngine {
    pub fn new(transport: Arc<dyn ChatTransport>, sessions: Arc<SessionStore>, client: ResilientClient) -> Self {
        Self {
            transport,
            sessions,
            client,
            pitch_client: None,
            formatter: ReplyFormatter::default(),
            users: None,
            messages: None,
            lookups: None,
            extractor: Arc::new(OfficeExtractor),
        }
    }

    pub fn with_formatter(mut self, formatter: ReplyFormatter) -> Self {
        self.formatter = formatter;
        self
    }

    /// Separate provider for `/pitch`
    pub fn with_pitch_client(mut self, client: ResilientClient) -> Self {
        self.pitch_client = Some(client);
        self
    }

    pub fn with_users(mut self, users: Arc<dyn UserStore>) -> Self {
        self.users = Some(users);
        self
    }

    pub fn with_messages(mut self, messages: Arc<dyn MessageStore>) -> Self {
        self.messages = Some(messages);
        self
    }

    pub fn with_lookups(mut self, lookups: Arc<dyn Lookups>) -> Self {
        self.lookups = Some(lookups);
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Handle one inbound update end to end
    pub async fn handle(&self, msg: InboundMessage) -> Result<()> {
        let chat_id = msg.chat_id;
        if let Some(sender) = &msg.sender {
            self.record_sender(sender);
        }

        match msg.kind {
            UpdateKind::Command { name, args } => {
                self.handle_command(chat_id, msg.sender.as_ref(), &name, &args).await
            }
            UpdateKind::Text(text) => self.handle_text(chat_id, msg.sender.as_ref(), &text).await,
            UpdateKind::Document(doc) => self.handle_document(chat_id, doc).await,
            UpdateKind::Unsupported => self.notify(chat_id, UNSUPPORTED_TEXT).await,
        }
    }

    fn record_sender(&self, sender: &TelegramUser) {
        let Some(users) = &self.users else { return };
        match users.upsert(sender) {
            Ok(user) => debug!(
                "User saved/updated: ID={}, Username={}, FirstName={}",
                user.id,
                user.username.as_deref().unwrap_or("N/A"),
                user.first_name
            ),
            Err(e) => warn!("Failed to save user {}: {}", sender.id, e),
        }
    }

    // ── Free text ───────────────────────────────────────────────

    async fn handle_text(&self, chat_id: i64, sender: Option<&TelegramUser>, text: &str) -> Result<()> {
        if let (Some(users), Some(sender)) = (&self.users, sender) {
            if let Err(e) = users.increment_message_count(sender.id) {
                warn!("Failed to increment message count for user {}: {}", sender.id, e);
            }
        }
        info!(
            "User {} in chat {}: {} chars",
            sender.map(|s| s.id).unwrap_or_default(),
            chat_id,
            text.chars().count()
        );

        if let Err(e) = self.transport.send_typing(chat_id).await {
            debug!("Typing indicator failed for chat {}: {}", chat_id, e);
        }

        let placeholder = match self.transport.send_text(chat_id, THINKING_TEXT, MarkupMode::Plain).await {
            Ok(id) => id,
            Err(e) => {
                warn!("Failed to send thinking message to chat {}: {}", chat_id, e);
                return Err(e.into());
            }
        };
        let mut cycle = ReplyCycle::new(chat_id, placeholder);

        let mut session = self.sessions.lock(chat_id).await;
        session.append(Turn::user(text));
        cycle.advance(Phase::Pending);

        let mut request = session.snapshot();
        if let Some(doc) = session.document() {
            if let Some(last) = request.last_mut() {
                *last = Turn::user(prompts::document_question_prompt(doc, text));
            }
        }

        let started = Instant::now();
        let reply = match self.client.complete(&request).await {
            Ok(reply) => {
                session.append(Turn::assistant(reply.clone()));
                cycle.advance(Phase::ResolvedSuccess);
                info!(
                    "{} responded in {:?} for chat {}",
                    self.client.provider_name(),
                    started.elapsed(),
                    chat_id
                );
                self.log_exchange(chat_id, text, &reply);
                Some(reply)
            }
            Err(e) => {
                error!("AI request failed for chat {}: {}", chat_id, e);
                session.rollback_last();
                cycle.advance(Phase::ResolvedFailure);
                None
            }
        };

        let delivered = match &reply {
            Some(reply) => self
                .formatter
                .deliver(self.transport.as_ref(), chat_id, Some(cycle.placeholder_id()), reply)
                .await
                .map(|_| ()),
            None => self.replace_placeholder(chat_id, cycle.placeholder_id(), APOLOGY_TEXT).await,
        };
        drop(session);
        cycle.advance(Phase::Delivered);

        delivered.map_err(|e| {
            error!("Failed to deliver reply to chat {}: {}", chat_id, e);
            RelayError::from(e)
        })
    }

    fn log_exchange(&self, chat_id: i64, user_text: &str, reply: &str) {
        let Some(messages) = &self.messages else { return };
        for (role, content) in [(Role::User, user_text), (Role::Assistant, reply)] {
            if let Err(e) = messages.save(&StoredMessage::now(chat_id, role, content)) {
                warn!("Failed to log {} message for chat {}: {}", role.as_str(), chat_id, e);
            }
        }
    }

    // ── Commands ────────────────────────────────────────────────

    async fn handle_command(
        &self,
        chat_id: i64,
        sender: Option<&TelegramUser>,
        name: &str,
        args: &str,
    ) -> Result<()> {
        debug!("Command /{} in chat {}", name, chat_id);
        if let (Some(users), Some(sender)) = (&self.users, sender) {
            if let Err(e) = users.touch(sender.id) {
                debug!("Failed to update last seen for {}: {}", sender.id, e);
            }
        }

        match name {
            "start" => {
                let first_name = self.first_name(sender);
                let welcome = format!(
                    "Hello {}! Welcome to the AI assistant bot!\n\n\
                     Use /help to see all available commands.\n\n\
                     Just send me any message and I'll respond using AI!",
                    first_name
                );
                self.notify(chat_id, &welcome).await
            }
            "help" => self.notify(chat_id, HELP_TEXT).await,
            "clear" => {
                self.sessions.clear(chat_id).await;
                info!("Cleared conversation for chat {}", chat_id);
                self.notify(chat_id, CLEARED_TEXT).await
            }
            "profile" => {
                let text = self
                    .profile_text(sender)
                    .unwrap_or_else(|| "Sorry, couldn't retrieve your profile information.".to_string());
                self.notify(chat_id, &text).await
            }
            "stats" => {
                let text = match self.stats_text(chat_id, sender).await {
                    Some(text) => text,
                    None => "Sorry, couldn't retrieve your statistics.".to_string(),
                };
                self.notify(chat_id, &text).await
            }
            "weather" => self.weather(chat_id, args).await,
            "pitch" => self.pitch(chat_id, args).await,
            "photo" => self.photo(chat_id, args).await,
            "image" => self.image(chat_id, args).await,
            _ => self.notify(chat_id, UNKNOWN_COMMAND_TEXT).await,
        }
    }

    fn first_name(&self, sender: Option<&TelegramUser>) -> String {
        let Some(sender) = sender else {
            return "there".to_string();
        };
        self.users
            .as_ref()
            .and_then(|users| users.get(sender.id).ok().flatten())
            .map(|user| user.first_name)
            .unwrap_or_else(|| sender.first_name.clone())
    }

    fn profile_text(&self, sender: Option<&TelegramUser>) -> Option<String> {
        let (users, sender) = (self.users.as_ref()?, sender?);
        let user = match users.get(sender.id) {
            Ok(Some(user)) => user,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to get user profile {}: {}", sender.id, e);
                return None;
            }
        };

        let name = match &user.last_name {
            Some(last) => format!("{} {}", user.first_name, last),
            None => user.first_name.clone(),
        };
        Some(format!(
            "Your Profile\n\nID: {}\nName: {}\nUsername: {}\nLanguage: {}\nMember since: {}\nLast seen: {}",
            user.id,
            name,
            user.username.as_deref().unwrap_or("N/A"),
            user.language_code.as_deref().unwrap_or("N/A"),
            user.created_at.format("%Y-%m-%d"),
            user.last_seen.format("%Y-%m-%d %H:%M:%S"),
        ))
    }

    async fn stats_text(&self, chat_id: i64, sender: Option<&TelegramUser>) -> Option<String> {
        let (users, sender) = (self.users.as_ref()?, sender?);
        let stats = match users.stats(sender.id) {
            Ok(Some(stats)) => stats,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to get user stats {}: {}", sender.id, e);
                return None;
            }
        };
        let in_session = self.sessions.turn_count(chat_id).await;

        Some(format!(
            "Your Statistics\n\nTotal messages sent: {}\nMessages in current session: {}\nMember since: {}\nLast seen: {}",
            stats.total_messages,
            in_session,
            stats.member_since.format("%Y-%m-%d"),
            stats.last_seen.format("%Y-%m-%d %H:%M:%S"),
        ))
    }

    async fn weather(&self, chat_id: i64, city: &str) -> Result<()> {
        if city.is_empty() {
            return self
                .notify(chat_id, "Please provide a city name. Example: /weather London")
                .await;
        }
        let report = match &self.lookups {
            Some(lookups) => lookups.weather(city).await,
            None => Err(anyhow::anyhow!("lookups not configured")),
        };
        match report {
            Ok(report) => self.notify(chat_id, &report.render()).await,
            Err(e) => {
                warn!("Weather lookup failed for {:?}: {}", city, e);
                self.notify(chat_id, "Sorry, I couldn't fetch the weather right now.").await
            }
        }
    }

    async fn pitch(&self, chat_id: i64, idea: &str) -> Result<()> {
        if idea.is_empty() {
            return self
                .notify(chat_id, "Please provide your startup idea. Example: /pitch AI tool for lawyers")
                .await;
        }

        let placeholder = match self
            .transport
            .send_text(chat_id, PITCH_PROGRESS_TEXT, MarkupMode::Plain)
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Failed to send pitch progress message: {}", e);
                None
            }
        };

        let client = self.pitch_client.as_ref().unwrap_or(&self.client);
        let result = client.prompt(&prompts::pitch_prompt(idea)).await;

        let delivered = match (result, placeholder) {
            (Ok(pitch), placeholder) => self
                .formatter
                .deliver(self.transport.as_ref(), chat_id, placeholder, &pitch)
                .await
                .map(|_| ()),
            (Err(e), Some(id)) => {
                error!("Failed to generate pitch: {}", e);
                self.replace_placeholder(chat_id, id, "Sorry, I couldn't generate a pitch right now.")
                    .await
            }
            (Err(e), None) => {
                error!("Failed to generate pitch: {}", e);
                return self
                    .notify(chat_id, "Sorry, I couldn't generate a pitch right now.")
                    .await;
            }
        };
        delivered.map_err(RelayError::from)
    }

    async fn photo(&self, chat_id: i64, query: &str) -> Result<()> {
        if query.is_empty() {
            return self.notify(chat_id, "Usage: /photo <query>").await;
        }
        let photo = match &self.lookups {
            Some(lookups) => lookups.random_photo(query).await,
            None => Err(anyhow::anyhow!("lookups not configured")),
        };
        match photo {
            Ok(photo) => {
                self.transport.send_photo(chat_id, &photo.url, &photo.caption).await?;
                Ok(())
            }
            Err(e) => {
                warn!("Photo lookup failed for {:?}: {}", query, e);
                self.notify(chat_id, "Can't find a photo for now.").await
            }
        }
    }

    async fn image(&self, chat_id: i64, prompt: &str) -> Result<()> {
        if prompt.is_empty() {
            return self.notify(chat_id, "Usage: /image <prompt>").await;
        }
        let image = match &self.lookups {
            Some(lookups) => lookups.ai_image(prompt),
            None => Err(anyhow::anyhow!("lookups not configured")),
        };
        let sent = match image {
            Ok(image) => self
                .transport
                .send_photo(chat_id, &image.url, &image.caption)
                .await
                .map_err(anyhow::Error::from),
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            warn!("Image generation failed for {:?}: {}", prompt, e);
            return self.notify(chat_id, "Can't generate an image for now.").await;
        }
        Ok(())
    }

    // ── Documents ───────────────────────────────────────────────

    async fn handle_document(&self, chat_id: i64, doc: DocumentRef) -> Result<()> {
        let file_name = doc.file_name.clone().unwrap_or_else(|| "document".to_string());
        let Some(kind) = DocumentKind::from_file_name(&file_name) else {
            return self.notify(chat_id, UNSUPPORTED_FORMAT_TEXT).await;
        };
        let label = kind.label();
        info!("Document {:?} ({}) in chat {}", file_name, label, chat_id);

        if let Err(e) = self.transport.send_upload_document(chat_id).await {
            debug!("Upload indicator failed for chat {}: {}", chat_id, e);
        }

        let placeholder = match self
            .transport
            .send_text(chat_id, &format!("Processing {}...", label), MarkupMode::Plain)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!("Failed to send processing message to chat {}: {}", chat_id, e);
                return Err(e.into());
            }
        };

        let bytes = match self.transport.download_file(&doc.file_id).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to download {} in chat {}: {}", file_name, chat_id, e);
                return self
                    .finish(chat_id, placeholder, &format!("Failed to download {} file.", label))
                    .await;
            }
        };

        let extractor = Arc::clone(&self.extractor);
        let extracted = tokio::task::spawn_blocking(move || extractor.extract(kind, &bytes)).await;
        let text = match extracted {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!("Failed to read {}: {}", file_name, e);
                return self.finish(chat_id, placeholder, &format!("Failed to read {}.", label)).await;
            }
            Err(e) => {
                error!("Extraction task for {} failed: {}", file_name, e);
                return self.finish(chat_id, placeholder, &format!("Failed to read {}.", label)).await;
            }
        };

        if text.trim().is_empty() {
            let msg = format!("No text found in {}. It might be image-based.", label);
            return self.finish(chat_id, placeholder, &msg).await;
        }

        if let Err(e) = self.replace_placeholder(chat_id, placeholder, GUIDE_PROGRESS_TEXT).await {
            debug!("Failed to show guide progress in chat {}: {}", chat_id, e);
        }

        let started = Instant::now();
        let prompt = prompts::educational_guide_prompt(&text, &file_name, label);
        let guide = match self.client.prompt(&prompt).await {
            Ok(guide) => guide,
            Err(e) => {
                error!("Educational guide generation failed: {}", e);
                return self.finish(chat_id, placeholder, GUIDE_FAILED_TEXT).await;
            }
        };

        self.sessions.cache_document(chat_id, text).await;
        self.formatter
            .deliver(
                self.transport.as_ref(),
                chat_id,
                Some(placeholder),
                &prompts::wrap_guide(&file_name, &guide),
            )
            .await?;
        info!("Educational guide created in {:?} for chat {}", started.elapsed(), chat_id);
        Ok(())
    }

    async fn finish(&self, chat_id: i64, placeholder: MessageId, text: &str) -> Result<()> {
        self.replace_placeholder(chat_id, placeholder, text).await?;
        Ok(())
    }

    // ── Delivery helpers ────────────────────────────────────────

    /// Overwrite a placeholder with a fixed plain message, sending a new
    /// message if the edit fails
    async fn replace_placeholder(
        &self,
        chat_id: i64,
        placeholder: MessageId,
        text: &str,
    ) -> std::result::Result<(), TransportError> {
        match self
            .transport
            .edit_text(chat_id, placeholder, text, MarkupMode::Plain)
            .await
        {
            Ok(()) | Err(TransportError::NotModified) => Ok(()),
            Err(e) => {
                warn!("Failed to edit message, sending new: {}", e);
                self.transport
                    .send_text(chat_id, text, MarkupMode::Plain)
                    .await
                    .map(|_| ())
            }
        }
    }

    /// Send a standalone message through the formatter
    async fn notify(&self, chat_id: i64, text: &str) -> Result<()> {
        self.formatter
            .deliver(self.transport.as_ref(), chat_id, None, text)
            .await?;
        Ok(())
    }
}
