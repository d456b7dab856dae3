//! Wire shapes for chats and messages.
//!
//! Pure mapping from domain entities. Field names are camelCase to match
//! the client contract (`createTime`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use parley_types::chat::{Chat, Message, MessageRole};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub create_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub id: Uuid,
    /// Omitted when the chat was loaded without its transcript.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<MessageResponse>>,
    pub create_time: DateTime<Utc>,
}

impl From<&Message> for MessageResponse {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            role: message.role,
            content: message.content.clone(),
            create_time: message.created_at,
            truncated: message.truncated,
        }
    }
}

impl From<&Chat> for ChatResponse {
    fn from(chat: &Chat) -> Self {
        Self {
            id: chat.id,
            messages: chat
                .messages
                .as_ref()
                .map(|messages| messages.iter().map(MessageResponse::from).collect()),
            create_time: chat.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_projection_without_messages() {
        let mut chat = Chat::new();
        chat.messages = None;
        let json = serde_json::to_value(ChatResponse::from(&chat)).unwrap();

        assert_eq!(json["id"], chat.id.to_string());
        assert!(json.get("messages").is_none());
        assert!(json.get("createTime").is_some());
    }

    #[test]
    fn test_chat_projection_keeps_message_order() {
        let chat = Chat::new();
        let messages = vec![
            Message::new(chat.id, MessageRole::User, "Hello"),
            Message::new(chat.id, MessageRole::Assistant, "Hi there!"),
        ];
        let chat = chat.with_messages(messages.clone());

        let projected = ChatResponse::from(&chat);
        let projected_messages = projected.messages.unwrap();
        assert_eq!(projected_messages.len(), 2);
        assert_eq!(projected_messages[0].id, messages[0].id);
        assert_eq!(projected_messages[1].content, "Hi there!");
    }

    #[test]
    fn test_message_projection_shape() {
        let msg = Message::new(uuid::Uuid::now_v7(), MessageRole::Assistant, "partial");
        let json = serde_json::to_value(MessageResponse::from(&msg)).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"], "partial");
        assert!(json.get("chatId").is_none());
        assert!(json.get("truncated").is_none());

        let json = serde_json::to_value(MessageResponse::from(&msg.truncated())).unwrap();
        assert_eq!(json["truncated"], true);
    }
}
