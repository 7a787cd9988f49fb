mod backend;
mod orchestrator;
mod preamble;

use crate::config::Config;
use crate::credentials::CredentialPool;
use crate::image::ImageDelegate;
use crate::store::ConversationStore;
use anyhow::Result;
use backend::{ClientFactory, RigBackend};
use orchestrator::{Orchestrator, OrchestratorOptions};
pub use orchestrator::{ChatReply, ChatRequest, ChatService};
use rig::{
    client::CompletionClient,
    providers::{anthropic, gemini, openai},
};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

fn openai_client(key: &str, base_url: &str) -> Result<openai::CompletionsClient> {
    let client: openai::CompletionsClient = openai::CompletionsClient::builder()
        .api_key(key)
        .base_url(base_url)
        .build()?;
    Ok(client)
}

fn gemini_client(key: &str, _base_url: &str) -> Result<gemini::Client> {
    Ok(gemini::Client::new(key)?)
}

fn anthropic_client(key: &str, base_url: &str) -> Result<anthropic::Client> {
    let client: anthropic::Client = anthropic::Client::builder()
        .api_key(key)
        .base_url(base_url)
        .build()?;
    Ok(client)
}

fn top_p_params(top_p: f64) -> serde_json::Value {
    json!({ "top_p": top_p })
}

fn gemini_params(top_p: f64) -> serde_json::Value {
    json!({ "generationConfig": { "topP": top_p } })
}

pub fn create_chat_service(
    config: &Config,
    store: ConversationStore,
) -> Result<Arc<dyn ChatService>> {
    info!(
        "Using {} completion provider with model {}",
        config.api_provider, config.model
    );
    match config.api_provider.as_str() {
        "gemini" => build(config, store, gemini_client, gemini_params),
        "anthropic" => build(config, store, anthropic_client, top_p_params),
        _ => build(config, store, openai_client, top_p_params),
    }
}

fn build<C>(
    config: &Config,
    store: ConversationStore,
    factory: ClientFactory<C>,
    sampling_params: fn(f64) -> serde_json::Value,
) -> Result<Arc<dyn ChatService>>
where
    C: CompletionClient + Clone + Send + Sync + 'static,
    C::CompletionModel: 'static,
{
    let backend = RigBackend::new(&config.model, &config.api_url, factory, sampling_params);
    let pool = CredentialPool::new(config.api_keys.clone(), config.key_cooldown)?;
    let orchestrator = Orchestrator::new(
        backend,
        pool,
        store,
        ImageDelegate::new(&config.images),
        OrchestratorOptions {
            generation: config.generation,
            rate_limit_retries: config.rate_limit_retries,
        },
    );
    Ok(Arc::new(orchestrator))
}
