//! Conversation persistence
//!
//! The engine only depends on the [`ConversationStore`] trait; the shipped
//! [`JsonConversationStore`] keeps one JSON document per conversation under
//! the data directory, written atomically via a temp file and rename.

use crate::storage::StorageError;
use crate::types::{Conversation, Message, Role};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Transactional store for conversations and their messages
///
/// Messages are append-only and listed in creation order. Writes may
/// interleave freely with generation; they share no state with the
/// inference session.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create a new conversation and return its id
    async fn create_conversation(&self, title: &str) -> Result<Uuid, StorageError>;

    /// Append a message to a conversation and return the message id
    async fn append_message(
        &self,
        conversation_id: Uuid,
        role: Role,
        content: &str,
    ) -> Result<Uuid, StorageError>;

    /// List a conversation's messages in creation order
    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, StorageError>;

    /// List all conversations, newest first
    async fn list_conversations(&self) -> Result<Vec<Conversation>, StorageError>;

    /// Archive or unarchive a conversation
    async fn set_archived(&self, conversation_id: Uuid, archived: bool)
        -> Result<(), StorageError>;

    /// Flag a message as indexed for embedding retrieval
    async fn mark_embedded(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
    ) -> Result<(), StorageError>;
}

/// On-disk record: conversation metadata plus its ordered messages
#[derive(Debug, Serialize, Deserialize)]
struct ConversationRecord {
    conversation: Conversation,
    messages: Vec<Message>,
}

/// File-backed store, one JSON document per conversation
pub struct JsonConversationStore {
    root: PathBuf,
    // Serializes read-modify-write cycles so appends never clobber each other
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonConversationStore {
    /// Create a store rooted at the given directory
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Create a store under the application data directory
    pub fn open_default() -> Result<Self, StorageError> {
        Self::new(crate::storage::get_data_dir()?.join("conversations"))
    }

    fn record_path(&self, conversation_id: Uuid) -> PathBuf {
        self.root.join(format!("{conversation_id}.json"))
    }

    async fn read_record(&self, conversation_id: Uuid) -> Result<ConversationRecord, StorageError> {
        let path = self.record_path(conversation_id);
        if !path.exists() {
            return Err(StorageError::ConversationNotFound(conversation_id));
        }
        let json = tokio::fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Write a record atomically: temp file first, then rename into place
    async fn write_record(&self, record: &ConversationRecord) -> Result<(), StorageError> {
        let path = self.record_path(record.conversation.id);
        let temp = self.root.join(format!("{}.json.tmp", record.conversation.id));
        let json = serde_json::to_string_pretty(record)?;
        tokio::fs::write(&temp, json).await?;
        tokio::fs::rename(&temp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for JsonConversationStore {
    async fn create_conversation(&self, title: &str) -> Result<Uuid, StorageError> {
        let _guard = self.write_lock.lock().await;
        let conversation = Conversation::new(title);
        let id = conversation.id;
        let record = ConversationRecord {
            conversation,
            messages: Vec::new(),
        };
        self.write_record(&record).await?;
        tracing::debug!("Created conversation {id}");
        Ok(id)
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        role: Role,
        content: &str,
    ) -> Result<Uuid, StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.read_record(conversation_id).await?;
        let message = Message::new(conversation_id, role, content);
        let id = message.id;
        record.messages.push(message);
        self.write_record(&record).await?;
        Ok(id)
    }

    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, StorageError> {
        let record = self.read_record(conversation_id).await?;
        Ok(record.messages)
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, StorageError> {
        let mut conversations = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "json") != Some(true) {
                continue;
            }
            let json = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<ConversationRecord>(&json) {
                Ok(record) => conversations.push(record.conversation),
                Err(e) => tracing::warn!("Skipping unreadable conversation {:?}: {e}", path),
            }
        }
        conversations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(conversations)
    }

    async fn set_archived(
        &self,
        conversation_id: Uuid,
        archived: bool,
    ) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.read_record(conversation_id).await?;
        record.conversation.archived = archived;
        self.write_record(&record).await
    }

    async fn mark_embedded(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
    ) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.read_record(conversation_id).await?;
        let message = record
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or(StorageError::MessageNotFound(message_id))?;
        message.is_embedded = true;
        self.write_record(&record).await
    }
}
