//! Chat service for the read/create side of the API.
//!
//! ChatService wraps a `ChatRepository` and exposes the operations behind
//! the list, get, and create endpoints. Streamed completions go through
//! `CompletionOrchestrator` instead.

use std::sync::Arc;

use parley_types::chat::Chat;
use parley_types::error::ChatError;
use tracing::info;
use uuid::Uuid;

use crate::chat::repository::ChatRepository;

/// Read/create operations over chats.
///
/// Generic over `ChatRepository` to maintain clean architecture
/// (parley-core never depends on parley-infra).
pub struct ChatService<C: ChatRepository> {
    chat_repo: Arc<C>,
}

impl<C: ChatRepository> ChatService<C> {
    /// Create a new chat service with the given repository.
    pub fn new(chat_repo: Arc<C>) -> Self {
        Self { chat_repo }
    }

    /// All chats, newest first, without transcripts.
    pub async fn list_chats(&self) -> Result<Vec<Chat>, ChatError> {
        Ok(self.chat_repo.list_chats().await?)
    }

    /// A chat with its full transcript in creation order.
    pub async fn get_chat(&self, chat_id: &Uuid) -> Result<Chat, ChatError> {
        let chat = self
            .chat_repo
            .get_chat(chat_id)
            .await?
            .ok_or(ChatError::NotFound)?;
        let messages = self.chat_repo.get_messages(chat_id).await?;
        Ok(chat.with_messages(messages))
    }

    /// Create a new, empty chat.
    pub async fn create_chat(&self) -> Result<Chat, ChatError> {
        let chat = self.chat_repo.create_chat(&Chat::new()).await?;
        info!(chat_id = %chat.id, "Chat created");
        Ok(chat)
    }

    /// Number of messages in a chat.
    pub async fn message_count(&self, chat_id: &Uuid) -> Result<u32, ChatError> {
        Ok(self.chat_repo.count_messages(chat_id).await?)
    }
}
