//! The canvas: the latest markdown summary of epics, features and risks.

use serde::{Deserialize, Serialize};

/// Single document slot holding the latest canvas markdown.
///
/// Owned by a [`ConversationState`](crate::state::ConversationState); each
/// write replaces the previous content entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Canvas {
    markdown: String,
    #[serde(default)]
    writes: u64,
}

impl Canvas {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the canvas content. No validation is applied.
    pub fn write(&mut self, markdown: impl Into<String>) {
        self.markdown = markdown.into();
        self.writes += 1;
    }

    pub fn read(&self) -> &str {
        &self.markdown
    }

    /// Number of writes since the session started
    pub fn writes(&self) -> u64 {
        self.writes
    }

    pub fn is_empty(&self) -> bool {
        self.markdown.is_empty()
    }
}
