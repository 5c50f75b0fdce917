//! Session Store
//!
//! In-memory rolling conversation window per chat.
//! Unlike the SQLite message log, this is what the provider actually sees:
//! the last N turns, oldest first, gone on restart.
//!
//! Each chat has its own async mutex. Different chats never contend; two
//! tasks for the same chat queue up behind each other.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

/// Turns kept per chat (sliding window)
pub const DEFAULT_WINDOW_SIZE: usize = 20;

/// Who authored a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// One role-tagged message in a conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    role: Role,
    content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Per-chat state: the turn window plus the last extracted document
#[derive(Debug)]
pub struct ChatSession {
    turns: VecDeque<Turn>,
    capacity: usize,
    /// Turns pushed out of the window by the latest append
    evicted: Vec<Turn>,
    document: Option<String>,
}

impl ChatSession {
    fn new(capacity: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(capacity + 1),
            capacity,
            evicted: Vec::new(),
            document: None,
        }
    }

    /// Append a turn, dropping the oldest turns beyond capacity
    pub fn append(&mut self, turn: Turn) {
        self.evicted.clear();
        self.turns.push_back(turn);
        while self.turns.len() > self.capacity {
            if let Some(old) = self.turns.pop_front() {
                self.evicted.push(old);
            }
        }
    }

    /// Remove the newest turn.
    ///
    /// If that turn was the latest append, anything it evicted is put back,
    /// so the window is exactly what it was before the append.
    pub fn rollback_last(&mut self) -> Option<Turn> {
        let removed = self.turns.pop_back()?;
        for old in self.evicted.drain(..).rev() {
            self.turns.push_front(old);
        }
        Some(removed)
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.evicted.clear();
        self.document = None;
    }

    /// Ordered copy of the window, oldest first
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn cache_document(&mut self, text: String) {
        self.document = Some(text);
    }

    pub fn document(&self) -> Option<&str> {
        self.document.as_deref()
    }
}

/// Exclusive handle on one chat's session, held across a reply cycle
pub type SessionGuard = OwnedMutexGuard<ChatSession>;

/// Shared store of per-chat sessions
pub struct SessionStore {
    capacity: usize,
    sessions: RwLock<HashMap<i64, Arc<Mutex<ChatSession>>>>,
}

impl SessionStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    async fn existing(&self, chat_id: i64) -> Option<Arc<Mutex<ChatSession>>> {
        self.sessions.read().await.get(&chat_id).cloned()
    }

    async fn slot(&self, chat_id: i64) -> Arc<Mutex<ChatSession>> {
        if let Some(slot) = self.existing(chat_id).await {
            return slot;
        }
        let mut sessions = self.sessions.write().await;
        let capacity = self.capacity;
        Arc::clone(sessions.entry(chat_id).or_insert_with(|| {
            debug!("Creating session for chat {}", chat_id);
            Arc::new(Mutex::new(ChatSession::new(capacity)))
        }))
    }

    /// Lock a chat's session, creating it on first use.
    ///
    /// The map lock is released before waiting on the chat lock, so a slow
    /// cycle in one chat never blocks another chat.
    pub async fn lock(&self, chat_id: i64) -> SessionGuard {
        self.slot(chat_id).await.lock_owned().await
    }

    pub async fn append(&self, chat_id: i64, turn: Turn) {
        self.lock(chat_id).await.append(turn);
    }

    pub async fn rollback_last(&self, chat_id: i64) -> Option<Turn> {
        let slot = self.existing(chat_id).await?;
        let mut session = slot.lock().await;
        session.rollback_last()
    }

    pub async fn clear(&self, chat_id: i64) {
        if let Some(slot) = self.existing(chat_id).await {
            slot.lock().await.clear();
            debug!("Cleared session for chat {}", chat_id);
        }
    }

    pub async fn snapshot(&self, chat_id: i64) -> Vec<Turn> {
        match self.existing(chat_id).await {
            Some(slot) => slot.lock().await.snapshot(),
            None => Vec::new(),
        }
    }

    pub async fn turn_count(&self, chat_id: i64) -> usize {
        match self.existing(chat_id).await {
            Some(slot) => slot.lock().await.len(),
            None => 0,
        }
    }

    pub async fn cache_document(&self, chat_id: i64, text: String) {
        self.lock(chat_id).await.cache_document(text);
    }

    pub async fn cached_document(&self, chat_id: i64) -> Option<String> {
        let slot = self.existing(chat_id).await?;
        let session = slot.lock().await;
        session.document().map(str::to_string)
    }

    /// Number of chats with a session
    pub async fn active_chats(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(n: usize) -> Vec<Turn> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    Turn::user(format!("question {}", i))
                } else {
                    Turn::assistant(format!("answer {}", i))
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn test_window_never_exceeds_capacity() {
        let store = SessionStore::default();
        for (i, turn) in numbered(55).into_iter().enumerate() {
            store.append(1, turn).await;
            assert!(store.turn_count(1).await <= DEFAULT_WINDOW_SIZE, "after append {}", i);
        }

        let window = store.snapshot(1).await;
        assert_eq!(window.len(), DEFAULT_WINDOW_SIZE);
        // Oldest surviving turn is #35, newest #54
        assert_eq!(window[0].content(), "answer 35");
        assert_eq!(window[19].content(), "question 54");
    }

    #[tokio::test]
    async fn test_rollback_restores_every_prior_state() {
        for prior in 0..=DEFAULT_WINDOW_SIZE {
            let store = SessionStore::default();
            for turn in numbered(prior) {
                store.append(7, turn).await;
            }
            let before = store.snapshot(7).await;

            store.append(7, Turn::user("unanswered")).await;
            let removed = store.rollback_last(7).await;

            assert_eq!(removed, Some(Turn::user("unanswered")));
            assert_eq!(store.snapshot(7).await, before, "prior length {}", prior);
        }
    }

    #[tokio::test]
    async fn test_rollback_on_empty_is_noop() {
        let store = SessionStore::default();
        assert!(store.rollback_last(5).await.is_none());

        store.append(5, Turn::user("hi")).await;
        store.rollback_last(5).await;
        assert!(store.rollback_last(5).await.is_none());
        assert_eq!(store.turn_count(5).await, 0);
    }

    #[tokio::test]
    async fn test_second_rollback_does_not_restore_twice() {
        let mut session = ChatSession::new(2);
        session.append(Turn::user("a"));
        session.append(Turn::assistant("b"));
        session.append(Turn::user("c")); // evicts "a"

        session.rollback_last();
        assert_eq!(session.snapshot(), vec![Turn::user("a"), Turn::assistant("b")]);

        session.rollback_last();
        assert_eq!(session.snapshot(), vec![Turn::user("a")]);
    }

    #[tokio::test]
    async fn test_clear_drops_turns_and_document() {
        let store = SessionStore::default();
        store.append(9, Turn::user("hello")).await;
        store.cache_document(9, "slide text".to_string()).await;

        store.clear(9).await;

        assert!(store.snapshot(9).await.is_empty());
        assert!(store.cached_document(9).await.is_none());
    }

    #[tokio::test]
    async fn test_chat_isolation() {
        let store = SessionStore::default();
        store.append(111, Turn::user("Chat 1 message")).await;
        store.append(222, Turn::user("Chat 2 message")).await;

        store.clear(222).await;

        assert_eq!(store.turn_count(111).await, 1);
        assert_eq!(store.turn_count(222).await, 0);
        assert_eq!(store.active_chats().await, 2);
    }

    #[tokio::test]
    async fn test_read_only_ops_do_not_create_sessions() {
        let store = SessionStore::default();
        assert!(store.snapshot(1).await.is_empty());
        assert_eq!(store.turn_count(1).await, 0);
        store.clear(1).await;
        assert_eq!(store.active_chats().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_same_chat_lose_nothing() {
        let store = Arc::new(SessionStore::new(1000));
        let mut handles = Vec::new();
        for i in 0..200 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.append(42, Turn::user(format!("msg {}", i))).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let window = store.snapshot(42).await;
        assert_eq!(window.len(), 200);
        let mut seen: Vec<&str> = window.iter().map(|t| t.content()).collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 200);
    }

    #[tokio::test]
    async fn test_lock_blocks_same_chat_only() {
        let store = Arc::new(SessionStore::default());
        let guard = store.lock(1).await;

        // Other chat proceeds while chat 1 is held
        store.append(2, Turn::user("independent")).await;
        assert_eq!(store.turn_count(2).await, 1);

        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.append(1, Turn::user("queued")).await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert_eq!(store.turn_count(1).await, 1);
    }

    #[test]
    fn test_role_round_trip_names() {
        assert_eq!(Role::parse(Role::User.as_str()), Some(Role::User));
        assert_eq!(Role::parse("assistant"), Some(Role::Assistant));
        assert_eq!(Role::parse("system"), None);
    }
}
