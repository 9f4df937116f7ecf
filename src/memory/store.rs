//! Bounded conversation history
//!
//! A fixed-capacity ring buffer of turns: slots are allocated once, the head
//! index advances on every append and the oldest turn is overwritten when the
//! window is full.

use crate::models::ConversationTurn;
use std::sync::Arc;
use uuid::Uuid;

/// Fixed-capacity ring of turns (slot arena + head index).
#[derive(Debug, Clone)]
pub struct TurnRing {
    slots: Vec<Option<Arc<ConversationTurn>>>,
    /// Next slot to write
    head: usize,
    len: usize,
}

impl TurnRing {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![None; capacity],
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append a turn, returning the evicted one when the ring was full.
    pub fn push(&mut self, turn: Arc<ConversationTurn>) -> Option<Arc<ConversationTurn>> {
        let evicted = self.slots[self.head].replace(turn);
        self.head = (self.head + 1) % self.capacity();
        if self.len < self.capacity() {
            self.len += 1;
        }
        evicted
    }

    /// Most recent turn first.
    pub fn iter_recent(&self) -> impl Iterator<Item = &Arc<ConversationTurn>> {
        let capacity = self.capacity();
        (1..=self.len).filter_map(move |offset| {
            let index = (self.head + capacity - offset) % capacity;
            self.slots[index].as_ref()
        })
    }

    /// Oldest turn first.
    pub fn iter_chronological(&self) -> impl Iterator<Item = &Arc<ConversationTurn>> {
        let mut turns: Vec<_> = self.iter_recent().collect();
        turns.reverse();
        turns.into_iter()
    }

    pub fn latest(&self) -> Option<&Arc<ConversationTurn>> {
        self.iter_recent().next()
    }
}

/// Conversation memory for one conversation id
#[derive(Debug, Clone)]
pub struct ContextMemory {
    conversation_id: Uuid,
    turns: TurnRing,
}

impl ContextMemory {
    pub fn new(conversation_id: Uuid, window: usize) -> Self {
        Self {
            conversation_id,
            turns: TurnRing::with_capacity(window),
        }
    }

    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    pub fn window(&self) -> usize {
        self.turns.capacity()
    }

    pub fn append(&mut self, turn: ConversationTurn) -> Option<Arc<ConversationTurn>> {
        self.turns.push(Arc::new(turn))
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    pub fn latest(&self) -> Option<&ConversationTurn> {
        self.turns.latest().map(|turn| turn.as_ref())
    }

    pub fn turns_recent_first(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter_recent().map(|turn| turn.as_ref())
    }

    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter_chronological().map(|turn| turn.as_ref())
    }
}
