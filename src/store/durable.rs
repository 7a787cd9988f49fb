use super::LIST_LIMIT;
use crate::conversation::{ChatMessage, Conversation, ConversationSummary};
use crate::entity::conversations;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sea_orm::*;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use thiserror::Error;
use tracing::info;

/// Returned by a write whose cutoff passed before it committed. Nothing was written.
#[derive(Debug, Error)]
#[error("deadline passed before the write was committed")]
pub struct DeadlineExceeded;

/// Conversation collection in a SQL database.
///
/// Writes from this process are serialized; `append` reads and rewrites the
/// message list inside one transaction.
#[derive(Debug, Clone)]
pub struct DurableStore {
    db_url: String,
    writes: Arc<Mutex<()>>,
}

impl DurableStore {
    pub fn new(db_url: impl Into<String>) -> Self {
        Self {
            db_url: db_url.into(),
            writes: Arc::new(Mutex::new(())),
        }
    }

    /// Connects and brings the schema up to date.
    pub async fn probe(&self) -> Result<()> {
        let db_url = self.db_url.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let db = Database::connect(&db_url).context("Failed to connect to database")?;
            db.get_schema_builder()
                .register(conversations::Entity)
                .apply(&db)?;
            Ok(())
        })
        .await?
    }

    pub async fn create(
        &self,
        title: String,
        user_id: Option<String>,
        messages: Vec<ChatMessage>,
        cutoff: Option<Instant>,
    ) -> Result<Conversation> {
        let now = Utc::now();
        let conversation = Conversation {
            id: uuid::Uuid::new_v4().simple().to_string(),
            title,
            user_id,
            messages,
            created_at: now,
            updated_at: now,
        };

        let record = conversations::ActiveModel {
            rowid: NotSet,
            id: Set(conversation.id.clone()),
            title: Set(conversation.title.clone()),
            user_id: Set(conversation.user_id.clone()),
            messages: Set(serde_json::to_string(&conversation.messages)?),
            created_at_us: Set(now.timestamp_micros()),
            updated_at_us: Set(now.timestamp_micros()),
        };

        let db_url = self.db_url.clone();
        let writes = self.writes.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let _guard = lock(&writes);
            let db = Database::connect(&db_url)?;
            check_cutoff(cutoff)?;
            conversations::Entity::insert(record).exec(&db)?;
            Ok(())
        })
        .await??;

        info!("Saved conversation {}", conversation.id);
        Ok(conversation)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Conversation>> {
        let db_url = self.db_url.clone();
        let id = id.to_string();

        tokio::task::spawn_blocking(move || -> Result<Option<Conversation>> {
            let db = Database::connect(&db_url)?;
            conversations::Entity::find()
                .filter(conversations::Column::Id.eq(&id))
                .one(&db)?
                .map(to_conversation)
                .transpose()
        })
        .await?
    }

    pub async fn list(&self, user_id: Option<&str>) -> Result<Vec<ConversationSummary>> {
        let db_url = self.db_url.clone();
        let user_id = user_id.map(str::to_string);

        tokio::task::spawn_blocking(move || -> Result<Vec<ConversationSummary>> {
            let db = Database::connect(&db_url)?;
            let mut query = conversations::Entity::find();
            if let Some(user_id) = user_id {
                query = query.filter(conversations::Column::UserId.eq(user_id));
            }
            let rows = query
                .order_by_desc(conversations::Column::UpdatedAtUs)
                .limit(LIST_LIMIT as u64)
                .all(&db)?;

            Ok(rows
                .into_iter()
                .map(|row| ConversationSummary {
                    id: row.id,
                    title: row.title,
                    created_at: from_micros(row.created_at_us),
                    updated_at: from_micros(row.updated_at_us),
                })
                .collect())
        })
        .await?
    }

    pub async fn append(
        &self,
        id: &str,
        message: ChatMessage,
        cutoff: Option<Instant>,
    ) -> Result<Option<Conversation>> {
        let db_url = self.db_url.clone();
        let writes = self.writes.clone();
        let id = id.to_string();

        tokio::task::spawn_blocking(move || -> Result<Option<Conversation>> {
            let _guard = lock(&writes);
            let db = Database::connect(&db_url)?;
            let txn = db.begin()?;
            let Some(row) = conversations::Entity::find()
                .filter(conversations::Column::Id.eq(&id))
                .one(&txn)?
            else {
                return Ok(None);
            };

            let mut messages: Vec<ChatMessage> = serde_json::from_str(&row.messages)
                .with_context(|| format!("Corrupt message list in conversation {}", id))?;
            messages.push(message);

            let mut active: conversations::ActiveModel = row.into();
            active.messages = Set(serde_json::to_string(&messages)?);
            active.updated_at_us = Set(Utc::now().timestamp_micros());

            check_cutoff(cutoff)?;
            let updated = active.update(&txn)?;
            txn.commit()?;

            to_conversation(updated).map(Some)
        })
        .await?
    }

    pub async fn rename(&self, id: &str, title: String) -> Result<Option<Conversation>> {
        let db_url = self.db_url.clone();
        let writes = self.writes.clone();
        let id = id.to_string();

        tokio::task::spawn_blocking(move || -> Result<Option<Conversation>> {
            let _guard = lock(&writes);
            let db = Database::connect(&db_url)?;
            let txn = db.begin()?;
            let Some(row) = conversations::Entity::find()
                .filter(conversations::Column::Id.eq(&id))
                .one(&txn)?
            else {
                return Ok(None);
            };

            let mut active: conversations::ActiveModel = row.into();
            active.title = Set(title);
            active.updated_at_us = Set(Utc::now().timestamp_micros());
            let updated = active.update(&txn)?;
            txn.commit()?;

            to_conversation(updated).map(Some)
        })
        .await?
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let db_url = self.db_url.clone();
        let writes = self.writes.clone();
        let id = id.to_string();

        let affected = tokio::task::spawn_blocking(move || -> Result<u64> {
            let _guard = lock(&writes);
            let db = Database::connect(&db_url)?;
            let result = conversations::Entity::delete_many()
                .filter(conversations::Column::Id.eq(&id))
                .exec(&db)?;
            Ok(result.rows_affected)
        })
        .await??;

        Ok(affected > 0)
    }

    pub async fn clear(&self, user_id: Option<&str>) -> Result<u64> {
        let db_url = self.db_url.clone();
        let writes = self.writes.clone();
        let user_id = user_id.map(str::to_string);

        let affected = tokio::task::spawn_blocking(move || -> Result<u64> {
            let _guard = lock(&writes);
            let db = Database::connect(&db_url)?;
            let mut query = conversations::Entity::delete_many();
            if let Some(user_id) = user_id {
                query = query.filter(conversations::Column::UserId.eq(user_id));
            }
            Ok(query.exec(&db)?.rows_affected)
        })
        .await??;

        info!("Cleared {} durable conversation(s)", affected);
        Ok(affected)
    }

    #[cfg(test)]
    pub(crate) fn hold_writes(&self) -> MutexGuard<'_, ()> {
        lock(&self.writes)
    }
}

fn lock(writes: &Mutex<()>) -> MutexGuard<'_, ()> {
    writes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn check_cutoff(cutoff: Option<Instant>) -> Result<()> {
    match cutoff {
        Some(at) if Instant::now() >= at => Err(DeadlineExceeded.into()),
        _ => Ok(()),
    }
}

/// Whether `err` means the database itself is unreachable, as opposed to a bad query.
pub fn is_connection_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<DbErr>(),
            Some(DbErr::Conn(_) | DbErr::ConnectionAcquire(_))
        )
    })
}

fn to_conversation(row: conversations::Model) -> Result<Conversation> {
    let messages = serde_json::from_str(&row.messages)
        .with_context(|| format!("Corrupt message list in conversation {}", row.id))?;
    Ok(Conversation {
        id: row.id,
        title: row.title,
        user_id: row.user_id,
        messages,
        created_at: from_micros(row.created_at_us),
        updated_at: from_micros(row.updated_at_us),
    })
}

fn from_micros(us: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(us).unwrap_or_default()
}
