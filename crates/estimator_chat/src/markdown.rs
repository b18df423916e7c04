//! Fenced code block detection.

use std::sync::OnceLock;

use regex::Regex;

use crate::types::Message;

/// A fenced code block found in message text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FencedBlock {
    /// Info string after the opening fence (e.g. `markdown`), may be empty
    pub info: String,
    /// Lines between the fences, joined with `\n`
    pub body: String,
}

fn opening_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[ \t]{0,3}(`{3,}|~{3,})[ \t]*([^`\s]*)[^`]*$").expect("valid fence regex")
    })
}

/// A closing fence uses the same character, is at least as long as the
/// opening fence and carries no info string.
fn closes(line: &str, fence: &str) -> bool {
    let trimmed = line.trim();
    let Some(ch) = fence.chars().next() else {
        return false;
    };
    trimmed.len() >= fence.len() && trimmed.chars().all(|c| c == ch)
}

/// Find every closed fenced block in `text`, in order.
///
/// An opening fence without a matching closing fence is not a block.
pub fn fenced_blocks(text: &str) -> Vec<FencedBlock> {
    let mut blocks = Vec::new();
    let mut open: Option<(String, String, Vec<&str>)> = None;

    for line in text.lines() {
        match open.as_mut() {
            Some((fence, _, body)) => {
                if closes(line, fence) {
                    if let Some((_, info, body)) = open.take() {
                        blocks.push(FencedBlock {
                            info,
                            body: body.join("\n"),
                        });
                    }
                } else {
                    body.push(line);
                }
            }
            None => {
                if let Some(caps) = opening_fence().captures(line) {
                    let fence = caps[1].to_string();
                    let info = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();
                    open = Some((fence, info, Vec::new()));
                }
            }
        }
    }

    blocks
}

pub fn has_fenced_block(text: &str) -> bool {
    !fenced_blocks(text).is_empty()
}

/// Whether any message in the window contains a closed fenced block
pub fn history_has_fenced_block(messages: &[Message]) -> bool {
    messages.iter().any(|m| has_fenced_block(&m.content))
}
