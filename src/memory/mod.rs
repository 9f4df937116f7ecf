//! Conversation Memory
//!
//! Bounded per-conversation history plus reference resolution.
//! Appends on one conversation are serialized by that conversation's lock;
//! different conversations never contend. A request holds the lock through a
//! [`ConversationSession`] from resolution until its turn is appended, so
//! turns are stored in arrival order.

pub mod resolver;
pub mod store;

pub use store::{ContextMemory, TurnRing};

use crate::models::{ConversationTurn, ExtractedEntity, IntentResult, ResolvedEntities};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;
use uuid::Uuid;

/// All live conversations, keyed by conversation id
pub struct ConversationMemory {
    window: usize,
    conversations: RwLock<HashMap<Uuid, Arc<Mutex<ContextMemory>>>>,
}

impl ConversationMemory {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            conversations: RwLock::new(HashMap::new()),
        }
    }

    async fn conversation(&self, conversation_id: Uuid) -> Arc<Mutex<ContextMemory>> {
        if let Some(existing) = self.conversations.read().await.get(&conversation_id) {
            return existing.clone();
        }

        let mut conversations = self.conversations.write().await;
        conversations
            .entry(conversation_id)
            .or_insert_with(|| {
                Arc::new(Mutex::new(ContextMemory::new(conversation_id, self.window)))
            })
            .clone()
    }

    /// Take the conversation's lock for the whole of one request. Waiters are
    /// served first come, first served.
    pub async fn session(&self, conversation_id: Uuid) -> ConversationSession {
        let handle = self.conversation(conversation_id).await;
        ConversationSession {
            memory: handle.lock_owned().await,
        }
    }

    /// Append a processed turn. Returns the number of turns now retained.
    pub async fn append(&self, turn: ConversationTurn) -> usize {
        let mut session = self.session(turn.utterance().conversation_id).await;
        session.append(turn)
    }

    pub async fn latest(&self, conversation_id: Uuid) -> Option<ConversationTurn> {
        let handle = self.conversation(conversation_id).await;
        let memory = handle.lock().await;
        memory.latest().cloned()
    }

    /// Point-in-time copy of one conversation (turns are shared, not cloned).
    pub async fn snapshot(&self, conversation_id: Uuid) -> ContextMemory {
        let handle = self.conversation(conversation_id).await;
        let memory = handle.lock().await;
        memory.clone()
    }

    pub async fn forget(&self, conversation_id: Uuid) -> bool {
        self.conversations
            .write()
            .await
            .remove(&conversation_id)
            .is_some()
    }

    pub async fn conversation_count(&self) -> usize {
        self.conversations.read().await.len()
    }
}

/// Exclusive access to one conversation, released on drop
pub struct ConversationSession {
    memory: OwnedMutexGuard<ContextMemory>,
}

impl ConversationSession {
    pub fn conversation_id(&self) -> Uuid {
        self.memory.conversation_id()
    }

    pub fn latest(&self) -> Option<&ConversationTurn> {
        self.memory.latest()
    }

    pub fn resolve(&self, entities: &[ExtractedEntity], intent: &IntentResult) -> ResolvedEntities {
        self.memory.resolve(entities, intent)
    }

    /// Append and release. Returns the number of turns now retained.
    pub fn append(&mut self, turn: ConversationTurn) -> usize {
        if let Some(evicted) = self.memory.append(turn) {
            debug!(
                conversation_id = %self.memory.conversation_id(),
                evicted_turn = %evicted.turn_id(),
                "Memory window full, evicted oldest turn"
            );
        }
        self.memory.turn_count()
    }
}
