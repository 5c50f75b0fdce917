//! Configuration management

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::format::DEFAULT_CHUNK_LIMIT;
use crate::provider::{RetryPolicy, GEMINI_DEFAULT_MODEL, OPENROUTER_DEFAULT_MODEL};
use crate::session::DEFAULT_WINDOW_SIZE;

/// Relay configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Telegram bot token (required)
    pub telegram_token: String,

    /// Gemini API key; the main conversational provider
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,

    /// OpenRouter key for `/pitch` (falls back to Gemini when unset)
    pub openrouter_api_key: Option<String>,
    pub openrouter_model: String,

    pub weather_api_key: Option<String>,
    pub unsplash_access_key: Option<String>,

    /// SQLite database for users and the message log
    pub db_path: PathBuf,

    /// Turns kept per chat
    pub window_size: usize,

    /// Max characters per outgoing message
    pub chunk_limit: usize,

    pub max_attempts: usize,
    pub backoff_base: Duration,
    pub request_timeout: Duration,
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let telegram_token = env_opt("TELEGRAM_BOT_TOKEN").context("TELEGRAM_BOT_TOKEN must be set")?;

        let db_path = std::env::var("RELAY_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_local_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("relaybot")
                    .join("relay.db")
            });

        Ok(Self {
            telegram_token,
            gemini_api_key: env_opt("GEMINI_API_KEY"),
            gemini_model: env_opt("GEMINI_MODEL").unwrap_or_else(|| GEMINI_DEFAULT_MODEL.to_string()),
            openrouter_api_key: env_opt("OPENROUTER_API_KEY"),
            openrouter_model: env_opt("OPENROUTER_MODEL").unwrap_or_else(|| OPENROUTER_DEFAULT_MODEL.to_string()),
            weather_api_key: env_opt("WEATHER_API_KEY"),
            unsplash_access_key: env_opt("UNSPLASH_ACCESS_KEY"),
            db_path,
            window_size: env_parse("RELAY_WINDOW_SIZE", DEFAULT_WINDOW_SIZE).max(1),
            chunk_limit: env_parse("RELAY_CHUNK_LIMIT", DEFAULT_CHUNK_LIMIT).max(100),
            max_attempts: env_parse("RELAY_MAX_ATTEMPTS", 4usize).max(1),
            backoff_base: Duration::from_millis(env_parse("RELAY_BACKOFF_BASE_MS", 1000u64)),
            request_timeout: Duration::from_secs(env_parse("RELAY_REQUEST_TIMEOUT_SECS", 60u64)),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.backoff_base)
    }
}
