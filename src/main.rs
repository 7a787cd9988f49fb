mod chat;
mod config;
mod conversation;
mod credentials;
mod deadline;
mod entity;
mod error;
mod http;
mod image;
mod intent;
mod monitor;
mod store;
mod utils;

use anyhow::Result;
use store::{ConversationStore, DurableStore, StorageMode, StorageSwitch};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    let durable = config.database_url.clone().map(DurableStore::new);
    if durable.is_none() {
        warn!("No database configured, conversations are kept in memory only");
    }
    let store = ConversationStore::new(StorageSwitch::new(StorageMode::Ephemeral), durable);
    let mode = monitor::check(&store).await;
    info!("Conversation storage starting in {:?} mode", mode);

    let chat = chat::create_chat_service(&config, store.clone())?;
    let monitor_handle = monitor::spawn(store, config.monitor_interval);

    let state = http::AppState {
        chat: chat.clone(),
        request_timeout: config.request_timeout,
        chat_limit: http::RequestLimiter::new(config.chat_rate_limit, config.chat_rate_window),
        api_limit: http::RequestLimiter::new(config.api_rate_limit, config.api_rate_window),
    };
    http::serve(&config.bind_addr, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown signal received");
    })
    .await?;

    if let Some(handle) = monitor_handle {
        handle.abort();
    }
    chat.shutdown();
    info!("Shutdown complete");

    Ok(())
}
