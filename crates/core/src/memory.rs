//! Bounded conversational memory.
//!
//! An ordered message log with a fixed capacity. Single owner; the agent
//! holds it by value and mutates it only between awaits.

use serde::{Deserialize, Serialize};

use crate::message::{Message, MessageRecord};

/// Default number of messages retained.
pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    messages: Vec<Message>,
    capacity: usize,
}

impl Memory {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            messages: Vec::new(),
            capacity,
        }
    }

    /// Append one message, evicting the oldest entries past capacity.
    pub fn add(&mut self, message: Message) {
        self.messages.push(message);
        if self.messages.len() > self.capacity {
            let overflow = self.messages.len() - self.capacity;
            self.messages.drain(..overflow);
        }
    }

    /// Append a batch as-is.
    ///
    /// The capacity bound is not applied here; the next [`Memory::add`]
    /// trims the log back down.
    pub fn add_all(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
    }

    /// The last `n` messages, oldest first.
    pub fn recent(&self, n: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    /// Plain records in chronological order, ready for a model API.
    pub fn to_serializable(&self) -> Vec<MessageRecord> {
        self.messages.iter().map(Message::to_record).collect()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}
