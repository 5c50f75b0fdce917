//! Telegram bot runner
//!
//! Wires config into the relay and runs the teloxide long-polling
//! dispatcher. Every message is handed to the [`DispatchEngine`] on its own
//! task so one slow reply never stalls polling.

use anyhow::{Context, Result};
use std::sync::Arc;
use teloxide::{
    dispatching::{Dispatcher, UpdateFilterExt},
    dptree,
    error_handlers::LoggingErrorHandler,
    prelude::*,
    types::Update,
};

use crate::config::Config;
use crate::dispatch::DispatchEngine;
use crate::format::ReplyFormatter;
use crate::lookups::HttpLookups;
use crate::provider::{GeminiProvider, OpenRouterProvider, ResilientClient};
use crate::session::SessionStore;
use crate::store::SqliteStore;
use crate::transport::{InboundMessage, TelegramTransport};

/// Build the relay from config and poll until Ctrl-C
pub async fn run_telegram_bot(config: Config) -> Result<()> {
    let gemini_key = config
        .gemini_api_key
        .clone()
        .context("GEMINI_API_KEY must be set")?;

    tracing::info!("Gemini model: {}", config.gemini_model);
    tracing::info!(
        "Pitch provider: {}",
        if config.openrouter_api_key.is_some() { config.openrouter_model.as_str() } else { "gemini (fallback)" }
    );
    tracing::info!("Relay database: {:?}", config.db_path);
    tracing::info!(
        "Window: {} turns, chunk limit: {}, retries: {} (base {:?})",
        config.window_size,
        config.chunk_limit,
        config.max_attempts,
        config.backoff_base
    );

    let bot = Bot::new(config.telegram_token.clone());

    tracing::info!("Verifying bot token...");
    match bot.get_me().await {
        Ok(me) => {
            tracing::info!(
                "Bot authenticated: @{} (ID: {})",
                me.username.as_deref().unwrap_or("unknown"),
                me.id
            );
        }
        Err(e) => {
            tracing::error!("Failed to authenticate bot: {}", e);
            anyhow::bail!("Bot authentication failed: {}", e);
        }
    }

    tracing::info!("Clearing webhook (if any)...");
    if let Err(e) = bot.delete_webhook().await {
        tracing::warn!("Failed to delete webhook: {} (continuing anyway)", e);
    }

    let engine = Arc::new(build_engine(&config, bot.clone(), gemini_key)?);

    let handler = dptree::entry().branch(Update::filter_message().endpoint(message_handler));

    tracing::info!("Starting dispatcher with long polling...");
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![engine])
        .default_handler(|upd| async move {
            tracing::debug!("Unhandled update: {:?}", upd.kind);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("Error in message handler"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    tracing::info!("Dispatcher stopped");
    Ok(())
}

fn build_engine(config: &Config, bot: Bot, gemini_key: String) -> Result<DispatchEngine> {
    let policy = config.retry_policy();

    let gemini = GeminiProvider::new(gemini_key, &config.gemini_model, config.request_timeout);
    let client = ResilientClient::new(Arc::new(gemini), policy.clone());

    let store = Arc::new(SqliteStore::open(&config.db_path)?);
    let lookups = HttpLookups::new(
        config.weather_api_key.clone(),
        config.unsplash_access_key.clone(),
        config.request_timeout,
    );

    let mut engine = DispatchEngine::new(
        Arc::new(TelegramTransport::new(bot)),
        Arc::new(SessionStore::new(config.window_size)),
        client,
    )
    .with_formatter(ReplyFormatter::new(config.chunk_limit))
    .with_users(store.clone())
    .with_messages(store)
    .with_lookups(Arc::new(lookups));

    if let Some(key) = &config.openrouter_api_key {
        let openrouter = OpenRouterProvider::new(key.clone(), &config.openrouter_model, config.request_timeout);
        engine = engine.with_pitch_client(ResilientClient::new(Arc::new(openrouter), policy));
    }

    Ok(engine)
}

async fn message_handler(msg: Message, engine: Arc<DispatchEngine>) -> ResponseResult<()> {
    let inbound = InboundMessage::from(&msg);
    tokio::spawn(async move {
        let chat_id = inbound.chat_id;
        if let Err(e) = engine.handle(inbound).await {
            tracing::warn!("Update in chat {} finished with error: {}", chat_id, e);
        }
    });
    Ok(())
}
