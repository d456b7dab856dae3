//! ChatRepository trait definition.
//!
//! Provides the chat and message operations the service and orchestrator
//! need. Uses native async fn in traits (RPITIT, Rust 2024 edition).

use parley_types::chat::{Chat, Message};
use parley_types::error::RepositoryError;
use uuid::Uuid;

/// Repository trait for chat and message persistence.
///
/// Implementations live in parley-infra (e.g., `SqliteChatRepository`).
pub trait ChatRepository: Send + Sync {
    /// Persist a new, empty chat.
    fn create_chat(
        &self,
        chat: &Chat,
    ) -> impl std::future::Future<Output = Result<Chat, RepositoryError>> + Send;

    /// Get a chat by id, without its messages.
    fn get_chat(
        &self,
        chat_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Chat>, RepositoryError>> + Send;

    /// List all chats, ordered by created_at DESC. Messages are not loaded.
    fn list_chats(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Chat>, RepositoryError>> + Send;

    /// Append a message to its chat.
    fn save_message(
        &self,
        message: &Message,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get all messages for a chat, ordered by created_at ASC.
    fn get_messages(
        &self,
        chat_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Message>, RepositoryError>> + Send;

    /// Count the messages in a chat.
    fn count_messages(
        &self,
        chat_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<u32, RepositoryError>> + Send;
}
