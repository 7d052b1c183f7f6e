//! Conversation metadata
//!
//! A conversation is an append-only, chronologically ordered collection of
//! messages. Ordering is maintained by the store; messages are never
//! reordered or rewritten after creation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A chat conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation id
    pub id: Uuid,
    /// Display title (derived from the first user message by the orchestrator)
    pub title: String,
    /// Whether the conversation has been archived
    #[serde(default)]
    pub archived: bool,
    /// Timestamp when the conversation was created
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new conversation with the given title
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            archived: false,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_creation() {
        let conv = Conversation::new("First chat");
        assert_eq!(conv.title, "First chat");
        assert!(!conv.archived);
    }

    #[test]
    fn test_conversation_serialization() {
        let conv = Conversation::new("roundtrip");
        let json = serde_json::to_string(&conv).unwrap();
        let back: Conversation = serde_json::from_str(&json).unwrap();
        assert_eq!(conv.id, back.id);
        assert_eq!(conv.title, back.title);
    }
}
