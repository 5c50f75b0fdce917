//! Relaybot - Entry Point
//!
//! Runs the Telegram relay. `--json` switches logs to JSON on stderr.

use relaybot::Config;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let json_logs = args.iter().any(|a| a == "--json");
    let help_mode = args.iter().any(|a| a == "--help" || a == "-h");

    if help_mode {
        println!("Relaybot v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: relaybot [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --json       Log as JSON to stderr");
        println!("  --help, -h   Show this help");
        println!();
        println!("Environment variables:");
        println!("  TELEGRAM_BOT_TOKEN          Telegram bot token (required)");
        println!("  GEMINI_API_KEY              Gemini API key (required)");
        println!("  GEMINI_MODEL                Gemini model (default: gemini-2.5-flash)");
        println!("  OPENROUTER_API_KEY          OpenRouter key for /pitch (optional)");
        println!("  OPENROUTER_MODEL            OpenRouter model for /pitch");
        println!("  WEATHER_API_KEY             weatherapi.com key for /weather");
        println!("  UNSPLASH_ACCESS_KEY         Unsplash key for /photo");
        println!("  RELAY_DB_PATH               SQLite path for users and message log");
        println!("  RELAY_WINDOW_SIZE           Turns kept per chat (default: 20)");
        println!("  RELAY_CHUNK_LIMIT           Max chars per message (default: 4000)");
        println!("  RELAY_MAX_ATTEMPTS          Provider attempts (default: 4)");
        println!("  RELAY_BACKOFF_BASE_MS       First retry delay (default: 1000)");
        println!("  RELAY_REQUEST_TIMEOUT_SECS  HTTP timeout (default: 60)");
        return Ok(());
    }

    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    if json_logs {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    info!("Relaybot v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    relaybot::telegram::run_telegram_bot(config).await?;

    Ok(())
}
