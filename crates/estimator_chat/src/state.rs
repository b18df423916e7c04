//! Conversation state carried through the graph and checkpointed per thread.

use serde::{Deserialize, Serialize};

use crate::canvas::Canvas;
use crate::types::Message;

/// Messages exchanged in a session plus the canvas they produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationState {
    pub messages: Vec<Message>,
    pub canvas: Canvas,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Messages appended after the first `len` ones
    pub fn since(&self, len: usize) -> &[Message] {
        &self.messages[len.min(self.messages.len())..]
    }
}
