//! Core types for the estimation chat.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a chat session (also the graph's thread id)
pub type SessionId = String;

/// Message role in a conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call requested by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Correlation id assigned by the model endpoint
    pub id: String,
    /// Name of the requested tool
    pub name: String,
    /// Decoded JSON arguments
    pub arguments: serde_json::Value,
}

/// A single chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID (UUID)
    pub id: String,
    /// Role of the message sender
    pub role: MessageRole,
    /// Message content
    pub content: String,
    /// Tool calls requested by an assistant message
    #[serde(rename = "toolCalls", default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For tool results, the id of the call this message answers
    #[serde(rename = "toolCallId", default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// When the message was created
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn with_role(role: MessageRole, content: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            created_at: Utc::now(),
        }
    }

    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::User, content.into())
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::Assistant, content.into())
    }

    /// Create an assistant message that requests tool calls
    pub fn assistant_with_tools(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        let mut message = Self::with_role(MessageRole::Assistant, content.into());
        message.tool_calls = calls;
        message
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::System, content.into())
    }

    /// Create a tool-result message answering `call_id`
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut message = Self::with_role(MessageRole::Tool, content.into());
        message.tool_call_id = Some(call_id.into());
        message
    }

    pub fn is_user(&self) -> bool {
        self.role == MessageRole::User
    }

    pub fn is_system(&self) -> bool {
        self.role == MessageRole::System
    }
}

/// The two conversational agents of the graph
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Conducts the estimation interview
    Thinking,
    /// Persists markdown blocks into the canvas
    Tool,
}

impl AgentRole {
    /// Graph node name of the agent
    pub fn node_name(&self) -> &'static str {
        match self {
            Self::Thinking => "thinking",
            Self::Tool => "tool-agent",
        }
    }
}

/// One model completion, either plain text or a request to run tools
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    Plain {
        content: String,
    },
    ToolRequest {
        content: String,
        calls: Vec<ToolCall>,
    },
}

impl ModelReply {
    pub fn plain(content: impl Into<String>) -> Self {
        Self::Plain {
            content: content.into(),
        }
    }

    /// Text the model produced alongside (or instead of) tool calls
    pub fn content(&self) -> &str {
        match self {
            Self::Plain { content } | Self::ToolRequest { content, .. } => content,
        }
    }

    /// Convert into the assistant message recorded in the history
    pub fn to_message(&self) -> Message {
        match self {
            Self::Plain { content } => Message::assistant(content.clone()),
            Self::ToolRequest { content, calls } => {
                Message::assistant_with_tools(content.clone(), calls.clone())
            }
        }
    }
}

/// Incremental output of a turn, consumed by the UI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// A streamed text fragment from one of the agents
    Token { agent: AgentRole, text: String },
    /// A tool-result message produced by a tool invocation
    ToolResult {
        #[serde(rename = "callId")]
        call_id: String,
        content: String,
    },
    /// The canvas changed during the turn
    Canvas { markdown: String },
    /// The turn completed and was committed
    Done { response: String, canvas: String },
    /// The turn failed; nothing was committed
    Error { message: String },
}

impl TurnEvent {
    /// SSE event name
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Token { .. } => "token",
            Self::ToolResult { .. } => "tool_result",
            Self::Canvas { .. } => "canvas",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    /// Whether no further events follow this one
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

/// An entry of the visible transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: MessageRole,
    pub content: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role, MessageRole::User);
        assert_eq!(msg.content, "Hello");
        assert!(!msg.id.is_empty());
        assert!(msg.tool_calls.is_empty());
        assert!(msg.tool_call_id.is_none());
    }

    #[test]
    fn test_tool_result_links_call() {
        let msg = Message::tool_result("call_1", "ok");
        assert_eq!(msg.role, MessageRole::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_reply_to_message() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "store_markdown".to_string(),
            arguments: serde_json::json!({ "markdownToSave": "# Epics" }),
        };
        let reply = ModelReply::ToolRequest {
            content: String::new(),
            calls: vec![call.clone()],
        };
        let msg = reply.to_message();
        assert_eq!(msg.role, MessageRole::Assistant);
        assert_eq!(msg.tool_calls, vec![call]);

        let msg = ModelReply::plain("Success").to_message();
        assert!(msg.tool_calls.is_empty());
        assert_eq!(msg.content, "Success");
    }

    #[test]
    fn test_turn_event_serialization() {
        let event = TurnEvent::Token {
            agent: AgentRole::Thinking,
            text: "Hi".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "token");
        assert_eq!(json["agent"], "thinking");
        assert_eq!(event.kind(), "token");
        assert!(!event.is_terminal());

        let event = TurnEvent::ToolResult {
            call_id: "call_1".to_string(),
            content: "ok".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["callId"], "call_1");

        assert!(TurnEvent::Error { message: "x".into() }.is_terminal());
    }
}
