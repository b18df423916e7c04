//! Conversation graph: thinking agent → tool agent ⇄ tool invocation.
//!
//! ```text
//!   start ──▶ thinking ──▶ tool-agent ──(plain reply)──▶ end
//!                              ▲    │
//!                              │    └─(tool request)─┐
//!                              │                     ▼
//!                              └──────────── tool-invocation
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::agents::{AgentSettings, ThinkingAgent, ToolAgent};
use crate::error::{ChatError, ChatResult};
use crate::llm::{ChatModel, DeltaSink};
use crate::state::ConversationState;
use crate::tools::ToolBox;
use crate::trim::{ApproxTokenCounter, TokenCounter};
use crate::types::{AgentRole, Message, ModelReply, ToolCall, TurnEvent};

/// Default cap on tool-agent → tool-invocation rounds per turn
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 4;

/// Graph nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Thinking,
    ToolAgent,
    ToolInvocation,
}

impl Node {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Thinking => AgentRole::Thinking.node_name(),
            Self::ToolAgent => AgentRole::Tool.node_name(),
            Self::ToolInvocation => "tool-invocation",
        }
    }
}

/// Settings for building a graph
#[derive(Debug, Clone)]
pub struct GraphSettings {
    pub thinking: AgentSettings,
    pub tool: AgentSettings,
    pub max_tool_rounds: usize,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            thinking: AgentSettings::thinking_default(),
            tool: AgentSettings::tool_default(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }
}

/// Result of a completed traversal
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// Everything streamed during the turn, as shown to the user
    pub response: String,
    /// Canvas after the turn
    pub canvas: String,
    /// Number of successful `store_markdown` calls
    pub canvas_writes: usize,
}

/// Text shown for a tool result in the response stream
pub fn tool_result_line(content: &str) -> String {
    format!("🛠️ Used tool to get: {}\n\n", content)
}

pub struct ConversationGraph {
    thinking: ThinkingAgent,
    tool_agent: ToolAgent,
    tools: Arc<ToolBox>,
    max_tool_rounds: usize,
}

impl ConversationGraph {
    pub fn new(
        thinking: ThinkingAgent,
        tool_agent: ToolAgent,
        tools: Arc<ToolBox>,
        max_tool_rounds: usize,
    ) -> Self {
        Self {
            thinking,
            tool_agent,
            tools,
            max_tool_rounds,
        }
    }

    /// Build both agents on one model client
    pub fn with_model(model: Arc<dyn ChatModel>, settings: GraphSettings) -> ChatResult<Self> {
        let counter: Arc<dyn TokenCounter> = Arc::new(ApproxTokenCounter::default());
        let tools = Arc::new(ToolBox::new()?);
        let thinking = ThinkingAgent::new(Arc::clone(&model), settings.thinking, Arc::clone(&counter));
        let tool_agent = ToolAgent::new(model, settings.tool, counter, Arc::clone(&tools));
        Ok(Self::new(thinking, tool_agent, tools, settings.max_tool_rounds))
    }

    /// Mermaid rendering of the wiring
    pub fn describe_mermaid(&self) -> String {
        let thinking = Node::Thinking.name();
        let agent = Node::ToolAgent.name();
        let invoke = Node::ToolInvocation.name();
        [
            "graph TD;".to_string(),
            format!("\t__start__ --> {};", thinking),
            format!("\t{} --> {};", thinking, agent),
            format!("\t{} -.->|tool request| {};", agent, invoke),
            format!("\t{} -.->|plain reply| __end__;", agent),
            format!("\t{} --> {};", invoke, agent),
        ]
        .join("\n")
    }

    /// Run one turn over `state`, streaming events into `tx`.
    ///
    /// `state` is mutated in place; callers that need all-or-nothing
    /// semantics pass a working copy and keep it only on success.
    pub async fn run_turn(
        &self,
        state: &mut ConversationState,
        user_input: &str,
        tx: &mpsc::UnboundedSender<TurnEvent>,
    ) -> ChatResult<TurnOutcome> {
        state.push(Message::user(user_input));

        let mut response = String::new();
        let mut canvas_writes = 0;
        let mut tool_rounds = 0;
        let mut node = Node::Thinking;
        let mut pending: Vec<ToolCall> = Vec::new();

        loop {
            if tx.is_closed() {
                return Err(ChatError::Cancelled);
            }
            debug!("Entering node {}", node.name());

            node = match node {
                Node::Thinking => {
                    let sink = DeltaSink::new(AgentRole::Thinking, tx.clone());
                    let reply = self.thinking.respond(state, &sink).await?;
                    response.push_str(reply.content());
                    state.push(reply.to_message());
                    Node::ToolAgent
                }
                Node::ToolAgent => {
                    let sink = DeltaSink::new(AgentRole::Tool, tx.clone());
                    let reply = self.tool_agent.respond(state, &sink).await?;
                    response.push_str(reply.content());
                    state.push(reply.to_message());
                    match reply {
                        ModelReply::ToolRequest { calls, .. } if !calls.is_empty() => {
                            pending = calls;
                            Node::ToolInvocation
                        }
                        _ => break,
                    }
                }
                Node::ToolInvocation => {
                    tool_rounds += 1;
                    if tool_rounds > self.max_tool_rounds {
                        return Err(ChatError::ToolRoundsExceeded(self.max_tool_rounds));
                    }
                    let calls = std::mem::take(&mut pending);
                    canvas_writes += self.invoke_tools(state, &calls, &mut response, tx)?;
                    Node::ToolAgent
                }
            };
        }

        info!(
            "Turn finished: {} chars streamed, {} canvas writes this turn, {} in session",
            response.len(),
            canvas_writes,
            state.canvas.writes()
        );

        Ok(TurnOutcome {
            response,
            canvas: state.canvas.read().to_string(),
            canvas_writes,
        })
    }

    /// Execute every requested call in order; returns how many stored markdown
    fn invoke_tools(
        &self,
        state: &mut ConversationState,
        calls: &[ToolCall],
        response: &mut String,
        tx: &mpsc::UnboundedSender<TurnEvent>,
    ) -> ChatResult<usize> {
        let mut writes = 0;
        for call in calls {
            let outcome = self.tools.invoke(call);
            let stored = outcome.canvas.is_some();
            let content = outcome.message.content.clone();
            outcome.apply(state);

            response.push_str(&tool_result_line(&content));
            tx.send(TurnEvent::ToolResult {
                call_id: call.id.clone(),
                content,
            })
            .map_err(|_| ChatError::Cancelled)?;

            if stored {
                writes += 1;
                tx.send(TurnEvent::Canvas {
                    markdown: state.canvas.read().to_string(),
                })
                .map_err(|_| ChatError::Cancelled)?;
            }
        }
        Ok(writes)
    }
}
