//! The two conversational agents.
//!
//! Each agent pairs a system prompt with a model, trims the conversation to
//! its token budget and runs one completion per call.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::ChatResult;
use crate::llm::{ChatModel, CompletionRequest, DeltaSink};
use crate::markdown::history_has_fenced_block;
use crate::outline::{self, leading_outline};
use crate::state::ConversationState;
use crate::tools::ToolBox;
use crate::trim::{trim_messages, TokenCounter};
use crate::types::{Message, MessageRole, ModelReply};

/// Reply of the tool agent when there is nothing to store
pub const TOOL_AGENT_ACK: &str = "Success";

/// Model and context budget of one agent
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSettings {
    pub model: String,
    pub temperature: f32,
    /// Token budget for the trimmed history, system prompt included
    pub max_tokens: usize,
}

impl AgentSettings {
    pub fn thinking_default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            temperature: 0.0,
            max_tokens: 100_000,
        }
    }

    pub fn tool_default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_tokens: 50_000,
        }
    }
}

fn prompt_window(
    system_prompt: &str,
    state: &ConversationState,
    settings: &AgentSettings,
    counter: &dyn TokenCounter,
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(state.messages.len() + 1);
    messages.push(Message::system(system_prompt));
    messages.extend(state.messages.iter().cloned());
    let trimmed = trim_messages(&messages, settings.max_tokens, counter);
    debug!(
        "Trimmed history from {} to {} messages for {}",
        messages.len(),
        trimmed.len(),
        settings.model
    );
    trimmed
}

/// Conducts the estimation interview
pub struct ThinkingAgent {
    model: Arc<dyn ChatModel>,
    settings: AgentSettings,
    counter: Arc<dyn TokenCounter>,
}

impl ThinkingAgent {
    pub fn new(
        model: Arc<dyn ChatModel>,
        settings: AgentSettings,
        counter: Arc<dyn TokenCounter>,
    ) -> Self {
        Self {
            model,
            settings,
            counter,
        }
    }

    pub fn system_prompt() -> &'static str {
        THINKING_SYSTEM_PROMPT
    }

    /// Produce one interview response for the latest user message.
    ///
    /// The agent has no tools; a tool request is downgraded to its text.
    pub async fn respond(&self, state: &ConversationState, sink: &DeltaSink) -> ChatResult<ModelReply> {
        let request = CompletionRequest {
            model: self.settings.model.clone(),
            temperature: self.settings.temperature,
            messages: prompt_window(THINKING_SYSTEM_PROMPT, state, &self.settings, self.counter.as_ref()),
            tools: Vec::new(),
        };

        let reply = match self.model.complete(request, sink).await? {
            ModelReply::ToolRequest { content, calls } => {
                warn!("Thinking agent requested {} tool calls without tools; ignoring", calls.len());
                ModelReply::Plain { content }
            }
            plain => plain,
        };

        audit_outline(state, reply.content());
        Ok(reply)
    }
}

/// Log responses that break the outline protocol
fn audit_outline(state: &ConversationState, response: &str) {
    let Some(current) = leading_outline(response) else {
        warn!("Thinking agent response does not start with an outline");
        return;
    };

    let user_message = state
        .messages
        .iter()
        .rev()
        .find(|m| m.role == MessageRole::User)
        .map(|m| m.content.as_str())
        .unwrap_or_default();
    let previous = state
        .messages
        .iter()
        .rev()
        .filter(|m| m.role == MessageRole::Assistant && m.tool_calls.is_empty())
        .find_map(|m| leading_outline(&m.content));

    if let Some(previous) = previous {
        let advanced = outline::advanced_without_resolution(
            &outline::parse(&previous.body),
            &outline::parse(&current.body),
            user_message,
        );
        if !advanced.is_empty() {
            warn!("Features marked resolved without user confirmation: {}", advanced.join(", "));
        }
    }
}

/// Persists fenced markdown blocks into the canvas via `store_markdown`
pub struct ToolAgent {
    model: Arc<dyn ChatModel>,
    settings: AgentSettings,
    counter: Arc<dyn TokenCounter>,
    tools: Arc<ToolBox>,
}

impl ToolAgent {
    pub fn new(
        model: Arc<dyn ChatModel>,
        settings: AgentSettings,
        counter: Arc<dyn TokenCounter>,
        tools: Arc<ToolBox>,
    ) -> Self {
        Self {
            model,
            settings,
            counter,
            tools,
        }
    }

    pub fn system_prompt() -> &'static str {
        TOOL_SYSTEM_PROMPT
    }

    /// Inspect the trimmed history and either request `store_markdown`
    /// calls or acknowledge.
    ///
    /// Without a fenced block in the window the model is not consulted.
    pub async fn respond(&self, state: &ConversationState, sink: &DeltaSink) -> ChatResult<ModelReply> {
        let messages = prompt_window(TOOL_SYSTEM_PROMPT, state, &self.settings, self.counter.as_ref());

        if !history_has_fenced_block(&messages[1..]) {
            debug!("No fenced block in tool agent window; skipping model call");
            sink.text(TOOL_AGENT_ACK)?;
            return Ok(ModelReply::plain(TOOL_AGENT_ACK));
        }

        let request = CompletionRequest {
            model: self.settings.model.clone(),
            temperature: self.settings.temperature,
            messages,
            tools: self.tools.definitions(),
        };
        self.model.complete(request, sink).await
    }
}

const THINKING_SYSTEM_PROMPT: &str = r#"You are a collaborative technical estimation assistant. You help the user produce a bottom-up analysis of a software project.

Your goal is to break the project into technical epics, then work through the features, unknowns, assumptions and risks of each epic together with the user.

Workflow:
1. Derive the high-level technical epics from the project brief.
2. For each epic, help the user list every technical feature or component it needs.
3. For each feature:
   - Ask whether it is fully understood or whether uncertainty remains.
   - Ask clarifying questions that uncover hidden scope and integrations.
   - Record open questions, assumptions and risks.
   - Keep asking about that feature until the user says it is "✅ good".
4. Only once an item is marked ✅ good, move on to the next feature or epic.

Always:
- Ask about technical feasibility, third-party dependencies, data flows and edge cases.
- Make ambiguities, missing information and risks explicit.
- Restate what the user said to confirm your understanding.
- NEVER invent technical details. Anything unclear or unknown is written down as an open question.
- Do not assume details such as the identity provider or hosting provider unless the user confirmed them.

Start EVERY response with the current results inside a fenced markdown code block, in this structure:

Epics:
- [Epic name] ✅ or ❌
  Features:
    - [Feature A] ✅ or ❌
       Assumptions:
        - ...
    - [Feature B] ❌
  Unknowns / Open Questions:
    - ...
  Risks:
    - ...

The user may interrupt with unrelated questions. Answer them helpfully, then return to the current unresolved item. You are a guide, not a passive question-and-answer service.

When in doubt, ask:
- "What makes you uncertain about this?"
- "Does this rely on any outside systems, tools, or decisions?"
- "Could this feature depend on business rules we haven't discussed yet?"
"#;

const TOOL_SYSTEM_PROMPT: &str = r#"You are an assistant that stores information with tools.

You read the messages given to you and look for markdown code blocks.
For each markdown code block you find, call the store_markdown tool with the block's content as markdownToSave.
If a tool result reports an error, correct the arguments or stop.
After storing, or when there is nothing to store, reply with a short success message.
"#;
