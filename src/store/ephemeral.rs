use super::LIST_LIMIT;
use crate::conversation::{ChatMessage, Conversation, ConversationSummary};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub const EPHEMERAL_ID_PREFIX: &str = "temp-";

/// Process-local conversation map, lost on restart.
#[derive(Debug, Clone, Default)]
pub struct EphemeralStore {
    conversations: Arc<RwLock<HashMap<String, Conversation>>>,
}

impl EphemeralStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(
        &self,
        title: String,
        user_id: Option<String>,
        messages: Vec<ChatMessage>,
    ) -> Conversation {
        let now = Utc::now();
        let conversation = Conversation {
            id: generate_id(),
            title,
            user_id,
            messages,
            created_at: now,
            updated_at: now,
        };
        self.conversations
            .write()
            .await
            .insert(conversation.id.clone(), conversation.clone());
        conversation
    }

    pub async fn get(&self, id: &str) -> Option<Conversation> {
        self.conversations.read().await.get(id).cloned()
    }

    pub async fn list(&self, user_id: Option<&str>) -> Vec<ConversationSummary> {
        let conversations = self.conversations.read().await;
        let mut summaries: Vec<ConversationSummary> = conversations
            .values()
            .filter(|c| owned_by(c, user_id))
            .map(Conversation::summary)
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries.truncate(LIST_LIMIT);
        summaries
    }

    pub async fn append(&self, id: &str, message: ChatMessage) -> Option<Conversation> {
        let mut conversations = self.conversations.write().await;
        let conversation = conversations.get_mut(id)?;
        conversation.messages.push(message);
        conversation.updated_at = Utc::now();
        Some(conversation.clone())
    }

    pub async fn rename(&self, id: &str, title: String) -> Option<Conversation> {
        let mut conversations = self.conversations.write().await;
        let conversation = conversations.get_mut(id)?;
        conversation.title = title;
        conversation.updated_at = Utc::now();
        Some(conversation.clone())
    }

    pub async fn delete(&self, id: &str) -> bool {
        self.conversations.write().await.remove(id).is_some()
    }

    pub async fn clear(&self, user_id: Option<&str>) -> u64 {
        let mut conversations = self.conversations.write().await;
        let before = conversations.len();
        conversations.retain(|_, c| !owned_by(c, user_id));
        (before - conversations.len()) as u64
    }
}

/// `None` selects every conversation; `Some(owner)` never matches anonymous ones.
fn owned_by(conversation: &Conversation, user_id: Option<&str>) -> bool {
    match user_id {
        Some(owner) => conversation.user_id.as_deref() == Some(owner),
        None => true,
    }
}

fn generate_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}{}-{}",
        EPHEMERAL_ID_PREFIX,
        Utc::now().timestamp_millis(),
        &suffix[..8]
    )
}
