//! Per-chat mutual exclusion for completion turns.
//!
//! Two completions on the same chat would otherwise interleave their
//! history reads and message writes. A turn holds its chat's lock from the
//! user message write until the assistant message write.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Table of per-chat locks. Cheap to clone; clones share the table.
#[derive(Clone, Default)]
pub struct ChatLocks {
    inner: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl ChatLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `chat_id`.
    pub async fn acquire(&self, chat_id: Uuid) -> ChatLockGuard {
        let mutex = self.inner.entry(chat_id).or_default().clone();
        let guard = mutex.lock_owned().await;
        ChatLockGuard {
            chat_id,
            table: Arc::clone(&self.inner),
            _guard: guard,
        }
    }

    /// Number of chats with a live lock entry.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Held for the duration of one turn. Releases the chat on drop.
pub struct ChatLockGuard {
    chat_id: Uuid,
    table: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for ChatLockGuard {
    fn drop(&mut self) {
        // Two references means only the table and this guard know the mutex.
        self.table
            .remove_if(&self.chat_id, |_, mutex| Arc::strong_count(mutex) <= 2);
    }
}
