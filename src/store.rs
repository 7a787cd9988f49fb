mod durable;
mod ephemeral;

use crate::conversation::{ChatMessage, Conversation, ConversationSummary};
use crate::deadline::Deadline;
use crate::error::ChatError;
use durable::DeadlineExceeded;
pub use durable::DurableStore;
pub use ephemeral::{EPHEMERAL_ID_PREFIX, EphemeralStore};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use tracing::{error, info, warn};

pub const LIST_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    Durable,
    Ephemeral,
}

/// Shared storage-mode cell. The store reads it on every operation; the
/// connectivity monitor writes it through [`StorageSwitch::set`].
#[derive(Debug, Clone)]
pub struct StorageSwitch {
    mode: Arc<RwLock<StorageMode>>,
}

impl StorageSwitch {
    pub fn new(mode: StorageMode) -> Self {
        Self {
            mode: Arc::new(RwLock::new(mode)),
        }
    }

    pub fn get(&self) -> StorageMode {
        *self.mode.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the previous mode.
    pub fn set(&self, mode: StorageMode) -> StorageMode {
        let mut current = self
            .mode
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous = std::mem::replace(&mut *current, mode);
        if previous != mode {
            match mode {
                StorageMode::Durable => info!("Database connected, conversations are persisted"),
                StorageMode::Ephemeral => warn!(
                    "Database unavailable, running in ephemeral mode: conversations will not survive a restart"
                ),
            }
        }
        previous
    }
}

/// Uniform conversation CRUD over whichever backend the switch selects.
///
/// Mode is resolved per call, nothing is migrated between backends: records
/// created while ephemeral stay in memory after the database comes back.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    switch: StorageSwitch,
    durable: Option<DurableStore>,
    ephemeral: EphemeralStore,
}

enum Backend<'a> {
    Durable(&'a DurableStore),
    Ephemeral(&'a EphemeralStore),
}

impl ConversationStore {
    pub fn new(switch: StorageSwitch, durable: Option<DurableStore>) -> Self {
        Self {
            switch,
            durable,
            ephemeral: EphemeralStore::new(),
        }
    }

    pub fn ephemeral_only() -> Self {
        Self::new(StorageSwitch::new(StorageMode::Ephemeral), None)
    }

    pub fn switch(&self) -> &StorageSwitch {
        &self.switch
    }

    pub fn durable(&self) -> Option<&DurableStore> {
        self.durable.as_ref()
    }

    pub fn mode(&self) -> StorageMode {
        match self.backend() {
            Backend::Durable(_) => StorageMode::Durable,
            Backend::Ephemeral(_) => StorageMode::Ephemeral,
        }
    }

    fn backend(&self) -> Backend<'_> {
        match (self.switch.get(), self.durable.as_ref()) {
            (StorageMode::Durable, Some(durable)) => Backend::Durable(durable),
            _ => Backend::Ephemeral(&self.ephemeral),
        }
    }

    pub async fn create(
        &self,
        title: String,
        user_id: Option<String>,
        messages: Vec<ChatMessage>,
    ) -> Result<Conversation, ChatError> {
        match self.backend() {
            Backend::Durable(db) => {
                self.durable_result(db.create(title, user_id, messages, None).await)
            }
            Backend::Ephemeral(mem) => Ok(mem.create(title, user_id, messages).await),
        }
    }

    /// Like [`ConversationStore::create`], but a `Timeout` guarantees nothing was stored.
    pub async fn create_before(
        &self,
        title: String,
        user_id: Option<String>,
        messages: Vec<ChatMessage>,
        deadline: &Deadline,
    ) -> Result<Conversation, ChatError> {
        match self.backend() {
            Backend::Durable(db) => {
                let result = db
                    .create(title, user_id, messages, Some(deadline.cutoff()))
                    .await;
                self.durable_write_result(result, deadline)
            }
            Backend::Ephemeral(mem) => deadline.bound(mem.create(title, user_id, messages)).await,
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<Conversation>, ChatError> {
        match self.backend() {
            Backend::Durable(db) => self.durable_result(db.get(id).await),
            Backend::Ephemeral(mem) => Ok(mem.get(id).await),
        }
    }

    pub async fn list(&self, user_id: Option<&str>) -> Result<Vec<ConversationSummary>, ChatError> {
        match self.backend() {
            Backend::Durable(db) => self.durable_result(db.list(user_id).await),
            Backend::Ephemeral(mem) => Ok(mem.list(user_id).await),
        }
    }

    pub async fn append(&self, id: &str, message: ChatMessage) -> Result<Conversation, ChatError> {
        let updated = match self.backend() {
            Backend::Durable(db) => self.durable_result(db.append(id, message, None).await)?,
            Backend::Ephemeral(mem) => mem.append(id, message).await,
        };
        updated.ok_or_else(|| ChatError::NotFound(id.to_string()))
    }

    /// Like [`ConversationStore::append`], but a `Timeout` guarantees the
    /// message was not stored.
    pub async fn append_before(
        &self,
        id: &str,
        message: ChatMessage,
        deadline: &Deadline,
    ) -> Result<Conversation, ChatError> {
        let updated = match self.backend() {
            Backend::Durable(db) => {
                let result = db.append(id, message, Some(deadline.cutoff())).await;
                self.durable_write_result(result, deadline)?
            }
            Backend::Ephemeral(mem) => deadline.bound(mem.append(id, message)).await?,
        };
        updated.ok_or_else(|| ChatError::NotFound(id.to_string()))
    }

    pub async fn rename(&self, id: &str, title: &str) -> Result<Conversation, ChatError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ChatError::Validation("Title is required".to_string()));
        }
        if title.chars().count() > crate::conversation::RENAMED_TITLE_MAX_LEN {
            return Err(ChatError::Validation(format!(
                "Title must be at most {} characters",
                crate::conversation::RENAMED_TITLE_MAX_LEN
            )));
        }

        let title = title.to_string();
        let updated = match self.backend() {
            Backend::Durable(db) => self.durable_result(db.rename(id, title).await)?,
            Backend::Ephemeral(mem) => mem.rename(id, title).await,
        };
        updated.ok_or_else(|| ChatError::NotFound(id.to_string()))
    }

    pub async fn delete(&self, id: &str) -> Result<bool, ChatError> {
        match self.backend() {
            Backend::Durable(db) => self.durable_result(db.delete(id).await),
            Backend::Ephemeral(mem) => Ok(mem.delete(id).await),
        }
    }

    /// `None` removes every conversation, owned or not.
    pub async fn clear(&self, user_id: Option<&str>) -> Result<u64, ChatError> {
        match self.backend() {
            Backend::Durable(db) => self.durable_result(db.clear(user_id).await),
            Backend::Ephemeral(mem) => Ok(mem.clear(user_id).await),
        }
    }

    /// A started durable write is never abandoned; it checks the deadline
    /// itself right before committing.
    fn durable_write_result<T>(
        &self,
        result: anyhow::Result<T>,
        deadline: &Deadline,
    ) -> Result<T, ChatError> {
        match result {
            Err(e) if e.is::<DeadlineExceeded>() => {
                warn!("Dropped a conversation write that missed its deadline");
                Err(deadline.expired())
            }
            result => self.durable_result(result),
        }
    }

    fn durable_result<T>(&self, result: anyhow::Result<T>) -> Result<T, ChatError> {
        result.map_err(|e| {
            error!("Database operation failed: {:#}", e);
            if durable::is_connection_error(&e) {
                self.switch.set(StorageMode::Ephemeral);
            }
            ChatError::Storage(e.to_string())
        })
    }
}
