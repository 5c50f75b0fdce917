//! Relaybot
//!
//! Telegram conversational relay to a hosted language model.
//!
//! # Features
//!
//! - **Rolling context**: last 20 turns per chat, in memory, per-chat locking
//! - **Resilient provider calls**: tagged transient/permanent errors, exponential backoff
//! - **Safe replies**: backtick/fence repair, fence-aware chunking, markup fallback
//! - **Study guides**: PDF/PPTX text extraction and guide generation
//! - **Extras**: weather, photos, generated images, pitch decks, user profiles
//!
//! # Architecture
//!
//! ```text
//! Telegram ──► TelegramTransport ──► DispatchEngine ──► ResilientClient ──► Gemini / OpenRouter
//!  (teloxide)                            │
//!                                        ├── SessionStore (window + document cache)
//!                                        ├── ReplyFormatter (sanitize, chunk, fallback)
//!                                        ├── SqliteStore (users, message log)
//!                                        ├── OfficeExtractor (lopdf, zip + quick-xml)
//!                                        └── HttpLookups (weather, Unsplash, Pollinations)
//! ```

pub mod config;
pub mod dispatch;
pub mod documents;
pub mod error;
pub mod format;
pub mod lookups;
pub mod prompts;
pub mod provider;
pub mod session;
pub mod store;
pub mod telegram;
pub mod transport;

pub use config::Config;
pub use dispatch::{DispatchEngine, Phase, ReplyCycle};
pub use documents::{DocumentKind, ExtractError, OfficeExtractor, TextExtractor};
pub use error::{RelayError, Result};
pub use format::{MessageChunk, ReplyFormatter};
pub use lookups::{HttpLookups, Lookups, Photo, WeatherReport};
pub use provider::{
    Completion, CompletionProvider, ErrorKind, GeminiProvider, OpenRouterProvider, ProviderError, ResilientClient,
    RetryPolicy,
};
pub use session::{Role, SessionStore, Turn};
pub use store::{MessageStore, SqliteStore, StoredMessage, User, UserStats, UserStore};
pub use transport::{ChatTransport, InboundMessage, MarkupMode, MessageId, TelegramTransport, TelegramUser, TransportError, UpdateKind};
