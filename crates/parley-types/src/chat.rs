//! Chat and message types for Parley.
//!
//! A chat is an append-only transcript: it is created empty and only ever
//! grows by new messages. Messages are immutable once persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Re-export MessageRole from llm module (it's used in both chat and llm contexts).
pub use crate::llm::MessageRole;

/// A conversation between a user and the assistant.
///
/// `messages` is `None` when the chat was loaded without its transcript
/// (e.g., in list views) and `Some` once the messages have been fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
}

impl Chat {
    /// Create a fresh, empty chat with a time-sortable id.
    pub fn new() -> Self {
        Self {
            id: Uuid::now_v7(),
            created_at: Utc::now(),
            messages: Some(Vec::new()),
        }
    }

    /// Attach a loaded transcript to this chat.
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = Some(messages);
        self
    }
}

impl Default for Chat {
    fn default() -> Self {
        Self::new()
    }
}

/// A single message within a chat.
///
/// Messages are ordered by `created_at` (ties broken by the v7 `id`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Set on assistant messages persisted from an interrupted stream.
    #[serde(default)]
    pub truncated: bool,
}

impl Message {
    /// Build a new message stamped with the current time.
    pub fn new(chat_id: Uuid, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            chat_id,
            role,
            content: content.into(),
            created_at: Utc::now(),
            truncated: false,
        }
    }

    /// Mark this message as holding only part of the intended content.
    pub fn truncated(mut self) -> Self {
        self.truncated = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_chat_is_empty() {
        let chat = Chat::new();
        assert_eq!(chat.messages.as_ref().map(Vec::len), Some(0));
    }

    #[test]
    fn test_new_chats_get_distinct_ids() {
        let a = Chat::new();
        let b = Chat::new();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_message_new_defaults() {
        let chat = Chat::new();
        let msg = Message::new(chat.id, MessageRole::User, "Hello");
        assert_eq!(msg.chat_id, chat.id);
        assert_eq!(msg.role, MessageRole::User);
        assert_eq!(msg.content, "Hello");
        assert!(!msg.truncated);
        assert!(msg.truncated().truncated);
    }

    #[test]
    fn test_message_role_reexport() {
        let role = MessageRole::Assistant;
        assert_eq!(role.to_string(), "assistant");
    }

    #[test]
    fn test_chat_without_messages_omits_field() {
        let mut chat = Chat::new();
        chat.messages = None;
        let json = serde_json::to_value(&chat).unwrap();
        assert!(json.get("messages").is_none());
    }
}
