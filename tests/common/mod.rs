//! Shared fakes for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use relaybot::provider::{Completion, CompletionProvider, ProviderError};
use relaybot::{ChatTransport, MarkupMode, MessageId, Turn, TransportError};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Typing,
    UploadDocument,
    Send { id: MessageId, text: String, mode: MarkupMode },
    Edit { id: MessageId, text: String, mode: MarkupMode },
    Delete { id: MessageId },
    Photo { url: String, caption: String },
}

/// In-memory chat platform that records every call
#[derive(Default)]
pub struct MockTransport {
    events: Mutex<Vec<(i64, Event)>>,
    /// Current text of each live message per chat
    messages: Mutex<HashMap<i64, BTreeMap<MessageId, String>>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    next_id: AtomicI32,
    reject_rich: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport that rejects every Markdown message
    pub fn rejecting_markup() -> Self {
        Self {
            reject_rich: true,
            ..Self::default()
        }
    }

    pub fn add_file(&self, file_id: &str, bytes: &[u8]) {
        self.files.lock().insert(file_id.to_string(), bytes.to_vec());
    }

    pub fn events(&self, chat_id: i64) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|(chat, _)| *chat == chat_id)
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Texts a user would currently see, oldest message first
    pub fn visible(&self, chat_id: i64) -> Vec<String> {
        self.messages
            .lock()
            .get(&chat_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    fn record(&self, chat_id: i64, event: Event) {
        self.events.lock().push((chat_id, event));
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn send_text(&self, chat_id: i64, text: &str, mode: MarkupMode) -> Result<MessageId, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.record(
            chat_id,
            Event::Send {
                id,
                text: text.to_string(),
                mode,
            },
        );
        if self.reject_rich && mode == MarkupMode::Rich {
            return Err(TransportError::MarkupRejected("can't parse entities".into()));
        }
        self.messages.lock().entry(chat_id).or_default().insert(id, text.to_string());
        Ok(id)
    }

    async fn edit_text(&self, chat_id: i64, id: MessageId, text: &str, mode: MarkupMode) -> Result<(), TransportError> {
        self.record(
            chat_id,
            Event::Edit {
                id,
                text: text.to_string(),
                mode,
            },
        );
        if self.reject_rich && mode == MarkupMode::Rich {
            return Err(TransportError::MarkupRejected("can't parse entities".into()));
        }
        let mut messages = self.messages.lock();
        let chat = messages.entry(chat_id).or_default();
        match chat.get_mut(&id) {
            Some(current) if current == text => Err(TransportError::NotModified),
            Some(current) => {
                *current = text.to_string();
                Ok(())
            }
            None => Err(TransportError::Request("message to edit not found".into())),
        }
    }

    async fn delete_message(&self, chat_id: i64, id: MessageId) -> Result<(), TransportError> {
        self.record(chat_id, Event::Delete { id });
        self.messages.lock().entry(chat_id).or_default().remove(&id);
        Ok(())
    }

    async fn send_typing(&self, chat_id: i64) -> Result<(), TransportError> {
        self.record(chat_id, Event::Typing);
        Ok(())
    }

    async fn send_upload_document(&self, chat_id: i64) -> Result<(), TransportError> {
        self.record(chat_id, Event::UploadDocument);
        Ok(())
    }

    async fn send_photo(&self, chat_id: i64, url: &str, caption: &str) -> Result<MessageId, TransportError> {
        self.record(
            chat_id,
            Event::Photo {
                url: url.to_string(),
                caption: caption.to_string(),
            },
        );
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, TransportError> {
        self.files
            .lock()
            .get(file_id)
            .cloned()
            .ok_or_else(|| TransportError::Request(format!("file {} not found", file_id)))
    }
}

/// Provider that replays scripted outcomes, then echoes
#[derive(Default)]
pub struct ScriptedProvider {
    outcomes: Mutex<VecDeque<Result<Completion, ProviderError>>>,
    requests: Mutex<Vec<Vec<Turn>>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(outcomes: Vec<Result<Completion, ProviderError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            ..Self::default()
        }
    }

    pub fn replying(text: &str) -> Self {
        Self::new(vec![Ok(Completion::Text(text.to_string()))])
    }

    /// Each call takes `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<Vec<Turn>> {
        self.requests.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, turns: &[Turn]) -> Result<Completion, ProviderError> {
        self.requests.lock().push(turns.to_vec());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let scripted = self.outcomes.lock().pop_front();
        scripted.unwrap_or_else(|| {
            let last = turns.last().map(|t| t.content().to_string()).unwrap_or_default();
            Ok(Completion::Text(format!("echo: {}", last)))
        })
    }
}
