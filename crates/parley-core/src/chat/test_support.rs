//! In-memory doubles shared by the chat module tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use parley_types::chat::{Chat, Message};
use parley_types::error::RepositoryError;
use uuid::Uuid;

use super::repository::ChatRepository;

/// Vec-backed repository with switchable write failures.
#[derive(Default)]
pub struct InMemoryChatRepository {
    chats: Mutex<Vec<Chat>>,
    messages: Mutex<Vec<Message>>,
    fail_writes: AtomicBool,
}

impl InMemoryChatRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub async fn seed_chat(&self) -> Chat {
        let chat = Chat::new();
        self.create_chat(&chat).await.unwrap()
    }
}

impl ChatRepository for InMemoryChatRepository {
    async fn create_chat(&self, chat: &Chat) -> Result<Chat, RepositoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Connection);
        }
        let mut stored = chat.clone();
        stored.messages = None;
        self.chats.lock().unwrap().push(stored);
        Ok(chat.clone())
    }

    async fn get_chat(&self, chat_id: &Uuid) -> Result<Option<Chat>, RepositoryError> {
        Ok(self
            .chats
            .lock()
            .unwrap()
            .iter()
            .find(|c| &c.id == chat_id)
            .cloned())
    }

    async fn list_chats(&self) -> Result<Vec<Chat>, RepositoryError> {
        let mut chats = self.chats.lock().unwrap().clone();
        chats.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(chats)
    }

    async fn save_message(&self, message: &Message) -> Result<(), RepositoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Connection);
        }
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn get_messages(&self, chat_id: &Uuid) -> Result<Vec<Message>, RepositoryError> {
        let mut messages: Vec<Message> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| &m.chat_id == chat_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(messages)
    }

    async fn count_messages(&self, chat_id: &Uuid) -> Result<u32, RepositoryError> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| &m.chat_id == chat_id)
            .count() as u32)
    }
}
