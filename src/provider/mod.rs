//! Completion providers
//!
//! A provider turns an ordered list of turns into generated text. Adapters
//! classify their own failures into [`ErrorKind`] so the retry loop in
//! [`ResilientClient`] never has to inspect error strings.

mod gemini;
mod openrouter;
mod retry;

pub use gemini::{GeminiProvider, DEFAULT_MODEL as GEMINI_DEFAULT_MODEL};
pub use openrouter::{OpenRouterProvider, DEFAULT_MODEL as OPENROUTER_DEFAULT_MODEL};
pub use retry::{ResilientClient, RetryAttempt, RetryPolicy};

use async_trait::async_trait;

use crate::session::Turn;

/// Text returned when the provider answers with no candidates
pub const EMPTY_RESPONSE_TEXT: &str = "AI response is empty";

/// Substrings that mark an error as worth retrying
const TRANSIENT_MARKERS: &[&str] = &["UNAVAILABLE", "overloaded", "timeout"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Overload, rate limit or timeout; retry may succeed
    Transient,
    /// Bad request, auth, malformed payload; retry won't help
    Permanent,
}

impl ErrorKind {
    /// Classify from an HTTP status (if any) and the error text.
    ///
    /// 429 and 503 are transient, as is any text containing one of the
    /// markers (case-sensitive). Everything else is permanent.
    pub fn classify(status: Option<u16>, text: &str) -> Self {
        if matches!(status, Some(429) | Some(503)) {
            return Self::Transient;
        }
        if TRANSIENT_MARKERS.iter().any(|m| text.contains(m)) {
            return Self::Transient;
        }
        Self::Permanent
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{detail}")]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl ProviderError {
    pub fn transient(detail: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            detail: detail.into(),
        }
    }

    pub fn permanent(detail: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            detail: detail.into(),
        }
    }

    /// Build an error for a non-success HTTP response
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = format!("API error (status {}): {}", status, body);
        Self {
            kind: ErrorKind::classify(Some(status), &detail),
            detail,
        }
    }

    /// Build an error for a failed request (connect, timeout, decode)
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        let detail = format!("request failed: {}", err);
        let kind = if err.is_timeout() {
            ErrorKind::Transient
        } else {
            ErrorKind::classify(err.status().map(|s| s.as_u16()), &detail)
        };
        Self { kind, detail }
    }

    pub fn is_retriable(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}

/// Successful provider outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Text(String),
    /// Well-formed response without any candidate text
    Empty,
}

impl Completion {
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Empty => EMPTY_RESPONSE_TEXT.to_string(),
        }
    }
}

/// Upstream language model
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Generate a reply for `turns`, oldest first
    async fn complete(&self, turns: &[Turn]) -> Result<Completion, ProviderError>;
}
