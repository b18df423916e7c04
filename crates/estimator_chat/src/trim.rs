//! History trimming to a token budget.
//!
//! Keeps the most recent messages that fit, always retains a leading system
//! message, and starts the retained window on a user message.

use crate::types::Message;

/// Counts the tokens a message costs in a model request
pub trait TokenCounter: Send + Sync {
    fn count(&self, message: &Message) -> usize;
}

/// Character-based estimate: `chars / chars_per_token` plus a fixed
/// per-message overhead for role and framing.
#[derive(Debug, Clone, Copy)]
pub struct ApproxTokenCounter {
    pub chars_per_token: f64,
    pub tokens_per_message: usize,
}

impl Default for ApproxTokenCounter {
    fn default() -> Self {
        Self {
            chars_per_token: 4.0,
            tokens_per_message: 3,
        }
    }
}

impl TokenCounter for ApproxTokenCounter {
    fn count(&self, message: &Message) -> usize {
        let mut chars = message.content.chars().count();
        for call in &message.tool_calls {
            chars += call.name.chars().count();
            chars += call.arguments.to_string().chars().count();
        }
        if let Some(id) = &message.tool_call_id {
            chars += id.chars().count();
        }
        (chars as f64 / self.chars_per_token).ceil() as usize + self.tokens_per_message
    }
}

/// Trim `messages` to at most `max_tokens`.
///
/// Whole messages only; a leading system message is always kept, even if it
/// alone exceeds the budget. The retained window begins on a user message,
/// so it is empty when no user message fits.
pub fn trim_messages(
    messages: &[Message],
    max_tokens: usize,
    counter: &dyn TokenCounter,
) -> Vec<Message> {
    let (system, rest) = match messages.split_first() {
        Some((first, rest)) if first.is_system() => (Some(first), rest),
        _ => (None, messages),
    };

    let mut budget = max_tokens.saturating_sub(system.map(|m| counter.count(m)).unwrap_or(0));
    let mut start = rest.len();
    for (index, message) in rest.iter().enumerate().rev() {
        let cost = counter.count(message);
        if cost > budget {
            break;
        }
        budget -= cost;
        start = index;
    }

    let window = &rest[start..];
    let first_user = window
        .iter()
        .position(Message::is_user)
        .unwrap_or(window.len());

    system
        .into_iter()
        .chain(window[first_user..].iter())
        .cloned()
        .collect()
}
