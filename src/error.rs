use std::time::Duration;
use thiserror::Error;

pub const RATE_LIMIT_MESSAGE: &str =
    "Rate limit reached. Please wait a moment and try again. কিছুক্ষণ পর আবার চেষ্টা করুন।";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Conversation not found: {0}")]
    NotFound(String),
    #[error("{}", RATE_LIMIT_MESSAGE)]
    RateLimited,
    #[error("Configuration error: {0}")]
    AuthConfig(String),
    #[error("Failed to generate AI response: {0}")]
    Provider(String),
    #[error("Timed out after {}s", .0.as_secs_f32())]
    Timeout(Duration),
    #[error("Storage error: {0}")]
    Storage(String),
}

impl ChatError {
    /// Whether re-issuing the same request may succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Provider(_) | Self::Timeout(_) | Self::Storage(_)
        )
    }
}
