use super::backend::{CompletionBackend, CompletionRequest, ProviderFailure};
use super::preamble::{FALLBACK_RESPONSE, SYSTEM_PROMPT};
use crate::config::GenerationConfig;
use crate::conversation::{self, ChatMessage, Conversation};
use crate::credentials::{CredentialPool, PoolStatus};
use crate::deadline::Deadline;
use crate::error::ChatError;
use crate::image::{self, ImageDelegate};
use crate::intent;
use crate::store::ConversationStore;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub message: String,
    pub conversation_id: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub response: String,
    pub conversation_id: String,
    pub conversation: Conversation,
}

/// Entry point used by the transport layer.
///
/// Continuations of one conversation are not serialized here: two concurrent
/// requests for the same id may interleave their turns.
#[async_trait]
pub trait ChatService: Send + Sync {
    async fn send(&self, request: ChatRequest, timeout: Duration) -> Result<ChatReply, ChatError>;

    fn store(&self) -> &ConversationStore;

    fn key_status(&self) -> PoolStatus;

    fn shutdown(&self);
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorOptions {
    pub generation: GenerationConfig,
    /// Extra attempts on another key after a rate limit. `0` surfaces the
    /// first rate limit to the caller.
    pub rate_limit_retries: u32,
}

pub struct Orchestrator<B: CompletionBackend> {
    backend: B,
    pool: CredentialPool<B::Client>,
    store: ConversationStore,
    images: ImageDelegate,
    options: OrchestratorOptions,
}

impl<B: CompletionBackend> Orchestrator<B> {
    pub fn new(
        backend: B,
        pool: CredentialPool<B::Client>,
        store: ConversationStore,
        images: ImageDelegate,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            backend,
            pool,
            store,
            images,
            options,
        }
    }

    async fn start(
        &self,
        message: &str,
        user_id: Option<String>,
        deadline: Deadline,
    ) -> Result<ChatReply, ChatError> {
        let title = conversation::title_from_message(message);
        let response = self.respond(message, &[], deadline).await?;

        let messages = vec![ChatMessage::user(message), ChatMessage::model(response.clone())];
        let conversation = self
            .store
            .create_before(title, user_id, messages, &deadline)
            .await?;

        info!("Started conversation {}", conversation.id);
        Ok(ChatReply {
            response,
            conversation_id: conversation.id.clone(),
            conversation,
        })
    }

    async fn resume(
        &self,
        id: &str,
        message: &str,
        deadline: Deadline,
    ) -> Result<ChatReply, ChatError> {
        let history = deadline
            .bound(self.store.get(id))
            .await??
            .ok_or_else(|| ChatError::NotFound(id.to_string()))?
            .messages;

        // Stored first: a failed completion leaves the turn unanswered, not lost.
        self.store
            .append_before(id, ChatMessage::user(message), &deadline)
            .await?;

        let response = self.respond(message, &history, deadline).await?;
        let conversation = self
            .store
            .append_before(id, ChatMessage::model(response.clone()), &deadline)
            .await?;

        Ok(ChatReply {
            response,
            conversation_id: conversation.id.clone(),
            conversation,
        })
    }

    async fn respond(
        &self,
        message: &str,
        history: &[ChatMessage],
        deadline: Deadline,
    ) -> Result<String, ChatError> {
        if intent::is_image_request(message) {
            info!("Image generation request detected");
            let prompt = intent::extract_prompt(message);
            let result = self.images.generate(&prompt);
            return Ok(image::format_response(&result));
        }

        let request = CompletionRequest {
            system_prompt: SYSTEM_PROMPT,
            history: history.to_vec(),
            message: message.to_string(),
            generation: self.options.generation,
        };
        self.complete(&request, deadline).await
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        deadline: Deadline,
    ) -> Result<String, ChatError> {
        let mut retries_left = self.options.rate_limit_retries;

        loop {
            let credential = self.pool.acquire();
            let client = self
                .pool
                .client(&credential, |key| self.backend.connect(key))
                .map_err(failure_to_error)?;

            info!("Sending completion request with key {}", credential);
            match deadline.bound(self.backend.complete(&client, request)).await? {
                Ok(Some(text)) => return Ok(text),
                Ok(None) => {
                    warn!("Completion provider returned an empty response");
                    return Ok(FALLBACK_RESPONSE.to_string());
                }
                Err(ProviderFailure::RateLimited(detail)) => {
                    self.pool.penalize(&credential);
                    if retries_left == 0 {
                        warn!("Completion request rate limited: {}", detail);
                        return Err(ChatError::RateLimited);
                    }
                    retries_left -= 1;
                    info!("Retrying rate-limited request on the next key");
                }
                Err(failure) => {
                    error!("Completion provider error: {}", failure);
                    return Err(failure_to_error(failure));
                }
            }
        }
    }
}

fn failure_to_error(failure: ProviderFailure) -> ChatError {
    match failure {
        ProviderFailure::RateLimited(_) => ChatError::RateLimited,
        ProviderFailure::InvalidCredentials(_) => ChatError::AuthConfig(
            "Invalid API key. Please check the configured completion API keys.".to_string(),
        ),
        ProviderFailure::UnknownModel(_) => ChatError::AuthConfig(
            "Model not available. Please check the completion provider configuration.".to_string(),
        ),
        ProviderFailure::Other(detail) => ChatError::Provider(detail),
    }
}

#[async_trait]
impl<B: CompletionBackend> ChatService for Orchestrator<B> {
    async fn send(&self, request: ChatRequest, timeout: Duration) -> Result<ChatReply, ChatError> {
        let message = request.message.trim();
        if message.is_empty() {
            return Err(ChatError::Validation("Message is required".to_string()));
        }

        let deadline = Deadline::after(timeout);
        match request.conversation_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => self.resume(id, message, deadline).await,
            None => self.start(message, request.user_id, deadline).await,
        }
    }

    fn store(&self) -> &ConversationStore {
        &self.store
    }

    fn key_status(&self) -> PoolStatus {
        self.pool.describe()
    }

    fn shutdown(&self) {
        self.pool.shutdown();
    }
}
