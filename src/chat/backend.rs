use crate::config::GenerationConfig;
use crate::conversation::{ChatMessage, Role};
use async_trait::async_trait;
use rig::{
    client::CompletionClient,
    completion::{Chat, Message},
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_prompt: &'static str,
    pub history: Vec<ChatMessage>,
    pub message: String,
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderFailure {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("{0}")]
    Other(String),
}

const RATE_LIMIT_MARKERS: &[&str] = &[
    "429",
    "rate_limit",
    "rate limit",
    "too many requests",
    "resource_exhausted",
];
const CREDENTIAL_MARKERS: &[&str] = &[
    "401",
    "invalid_api_key",
    "invalid api key",
    "api key not valid",
    "unauthorized",
];
const MODEL_MARKERS: &[&str] = &["model_not_found", "model not found"];

impl ProviderFailure {
    /// Sorts a provider error message into a failure kind.
    pub fn classify(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let lower = detail.to_lowercase();

        if contains_any(&lower, RATE_LIMIT_MARKERS) {
            Self::RateLimited(detail)
        } else if contains_any(&lower, CREDENTIAL_MARKERS) {
            Self::InvalidCredentials(detail)
        } else if contains_any(&lower, MODEL_MARKERS) {
            Self::UnknownModel(detail)
        } else {
            Self::Other(detail)
        }
    }
}

fn contains_any(haystack: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| haystack.contains(m))
}

/// Seam between the orchestrator and a concrete text-completion provider.
#[async_trait]
pub trait CompletionBackend: Send + Sync + 'static {
    /// Per-key client, cached by the credential pool.
    type Client: Clone + Send + Sync + 'static;

    fn connect(&self, key: &str) -> Result<Self::Client, ProviderFailure>;

    /// `Ok(None)` when the provider answered with an empty payload.
    async fn complete(
        &self,
        client: &Self::Client,
        request: &CompletionRequest,
    ) -> Result<Option<String>, ProviderFailure>;
}

pub type ClientFactory<C> = fn(key: &str, base_url: &str) -> anyhow::Result<C>;

/// [`CompletionBackend`] over any rig completion client.
pub struct RigBackend<C> {
    model: String,
    base_url: String,
    factory: ClientFactory<C>,
    sampling_params: fn(f64) -> serde_json::Value,
}

impl<C> RigBackend<C> {
    pub fn new(
        model: &str,
        base_url: &str,
        factory: ClientFactory<C>,
        sampling_params: fn(f64) -> serde_json::Value,
    ) -> Self {
        Self {
            model: model.to_string(),
            base_url: base_url.to_string(),
            factory,
            sampling_params,
        }
    }
}

fn to_rig_message(message: &ChatMessage) -> Message {
    match message.role {
        Role::User => Message::user(message.content.clone()),
        Role::Model => Message::assistant(message.content.clone()),
    }
}

#[async_trait]
impl<C> CompletionBackend for RigBackend<C>
where
    C: CompletionClient + Clone + Send + Sync + 'static,
    C::CompletionModel: 'static,
{
    type Client = C;

    fn connect(&self, key: &str) -> Result<C, ProviderFailure> {
        (self.factory)(key, &self.base_url).map_err(|e| ProviderFailure::classify(e.to_string()))
    }

    async fn complete(
        &self,
        client: &C,
        request: &CompletionRequest,
    ) -> Result<Option<String>, ProviderFailure> {
        let agent = client
            .agent(&self.model)
            .preamble(request.system_prompt)
            .temperature(request.generation.temperature)
            .max_tokens(request.generation.max_tokens)
            .additional_params((self.sampling_params)(request.generation.top_p))
            .build();

        let history: Vec<Message> = request.history.iter().map(to_rig_message).collect();
        debug!(
            model = %self.model,
            history_len = history.len(),
            "sending completion request"
        );

        let text = agent
            .chat(Message::user(request.message.clone()), history)
            .await
            .map_err(|e| ProviderFailure::classify(e.to_string()))?;

        Ok(Some(text).filter(|t| !t.trim().is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_rate_limits() {
        for detail in [
            "ProviderError: 429 Too Many Requests",
            "Rate limit reached for model llama-3.3-70b-versatile",
            "{\"error\":{\"code\":\"rate_limit_exceeded\"}}",
            "RESOURCE_EXHAUSTED: quota",
        ] {
            assert!(
                matches!(ProviderFailure::classify(detail), ProviderFailure::RateLimited(_)),
                "{detail}"
            );
        }
    }

    #[test]
    fn classifies_credential_and_model_errors() {
        assert!(matches!(
            ProviderFailure::classify("HTTP 401: invalid_api_key"),
            ProviderFailure::InvalidCredentials(_)
        ));
        assert!(matches!(
            ProviderFailure::classify("The model `llama-9` does not exist (model_not_found)"),
            ProviderFailure::UnknownModel(_)
        ));
    }

    #[test]
    fn other_errors_keep_detail() {
        assert_eq!(
            ProviderFailure::classify("connection reset by peer"),
            ProviderFailure::Other("connection reset by peer".into())
        );
    }

    #[test]
    fn history_roles_map_to_rig_roles() {
        let user = to_rig_message(&ChatMessage::user("hi"));
        let model = to_rig_message(&ChatMessage::model("hello"));
        assert!(matches!(user, Message::User { .. }));
        assert!(matches!(model, Message::Assistant { .. }));
    }
}
