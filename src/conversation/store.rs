//! Conversation persistence
//!
//! A missing conversation is a fresh session. Deletion happens outside the
//! state machine, so `update` reports whether the record still existed.

use crate::models::Conversation;
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[async_trait::async_trait]
pub trait ConversationStore: Send + Sync {
    async fn load(&self, conversation_id: Uuid) -> Result<Option<Conversation>>;
    async fn create(&self, conversation: &Conversation) -> Result<()>;
    /// Returns false when the conversation was deleted in the meantime; the
    /// record is not resurrected.
    async fn update(&self, conversation: &Conversation) -> Result<bool>;
    async fn delete(&self, conversation_id: Uuid) -> Result<bool>;
}

pub struct InMemoryConversationStore {
    conversations: Arc<RwLock<HashMap<Uuid, Conversation>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self {
            conversations: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn load(&self, conversation_id: Uuid) -> Result<Option<Conversation>> {
        let conversations = self.conversations.read().await;
        Ok(conversations.get(&conversation_id).cloned())
    }

    async fn create(&self, conversation: &Conversation) -> Result<()> {
        let mut conversations = self.conversations.write().await;
        conversations.insert(conversation.id, conversation.clone());
        Ok(())
    }

    async fn update(&self, conversation: &Conversation) -> Result<bool> {
        let mut conversations = self.conversations.write().await;
        match conversations.get_mut(&conversation.id) {
            Some(existing) => {
                *existing = conversation.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, conversation_id: Uuid) -> Result<bool> {
        let mut conversations = self.conversations.write().await;
        Ok(conversations.remove(&conversation_id).is_some())
    }
}
