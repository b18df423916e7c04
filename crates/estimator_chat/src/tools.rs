//! The `store_markdown` tool the tool agent can call.
//!
//! Invoking it never touches shared state: it returns a [`ToolOutcome`] that
//! the graph applies to the conversation state it is working on.

use jsonschema::JSONSchema;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{ChatError, ChatResult};
use crate::state::ConversationState;
use crate::types::{Message, ToolCall};

pub const STORE_MARKDOWN: &str = "store_markdown";

/// Argument name of `store_markdown`
pub const MARKDOWN_ARG: &str = "markdownToSave";

/// Acknowledgement returned for a successful store
pub const STORE_ACK: &str = "Successfully stored markdown in the canvas";

/// A tool as declared to the model
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Result of one tool call
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    /// New canvas content, if the call stored one
    pub canvas: Option<String>,
    /// Tool-result message tagged with the call id
    pub message: Message,
}

impl ToolOutcome {
    fn rejected(call: &ToolCall, reason: impl AsRef<str>) -> Self {
        Self {
            canvas: None,
            message: Message::tool_result(&call.id, format!("Error: {}", reason.as_ref())),
        }
    }

    pub fn is_error(&self) -> bool {
        self.canvas.is_none()
    }

    /// Write the outcome into `state`: canvas first, then the result message
    pub fn apply(self, state: &mut ConversationState) {
        if let Some(markdown) = self.canvas {
            state.canvas.write(markdown);
        }
        state.push(self.message);
    }
}

/// Declared tools and their argument validators.
///
/// Only `store_markdown` is registered; any other name is rejected.
pub struct ToolBox {
    store_markdown: ToolDefinition,
    validator: JSONSchema,
}

impl ToolBox {
    pub fn new() -> ChatResult<Self> {
        let store_markdown = store_markdown_definition();
        let validator = JSONSchema::compile(&store_markdown.parameters)
            .map_err(|e| ChatError::Tool(format!("Invalid schema for {}: {}", STORE_MARKDOWN, e)))?;
        Ok(Self {
            store_markdown,
            validator,
        })
    }

    /// Tool definitions bound to the tool agent
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        vec![self.store_markdown.clone()]
    }

    /// Execute one call. Unknown tools and invalid arguments are rejected
    /// with an error tool-result and leave the canvas unchanged.
    pub fn invoke(&self, call: &ToolCall) -> ToolOutcome {
        if call.name != STORE_MARKDOWN {
            warn!("Rejected call {} to unknown tool {}", call.id, call.name);
            return ToolOutcome::rejected(call, format!("unknown tool '{}'", call.name));
        }

        let problems: Vec<String> = match self.validator.validate(&call.arguments) {
            Ok(()) => Vec::new(),
            Err(errors) => errors.map(|e| e.to_string()).collect(),
        };
        if !problems.is_empty() {
            warn!("Rejected {} call {}: {}", STORE_MARKDOWN, call.id, problems.join("; "));
            return ToolOutcome::rejected(
                call,
                format!("invalid arguments for {}: {}", STORE_MARKDOWN, problems.join("; ")),
            );
        }

        let Some(markdown) = call.arguments.get(MARKDOWN_ARG).and_then(|v| v.as_str()) else {
            return ToolOutcome::rejected(call, format!("missing '{}'", MARKDOWN_ARG));
        };

        info!("Storing {} bytes of markdown (call {})", markdown.len(), call.id);
        ToolOutcome {
            canvas: Some(markdown.to_string()),
            message: Message::tool_result(&call.id, STORE_ACK),
        }
    }
}

fn store_markdown_definition() -> ToolDefinition {
    ToolDefinition {
        name: STORE_MARKDOWN.to_string(),
        description: "Store markdown in the canvas".to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                MARKDOWN_ARG: {
                    "type": "string",
                    "description": "The markdown to save, verbatim"
                }
            },
            "required": [MARKDOWN_ARG],
            "additionalProperties": false
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageRole;

    fn call(name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments,
        }
    }

    #[test]
    fn test_definition() {
        let tools = ToolBox::new().unwrap();
        let defs = tools.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "store_markdown");
        assert_eq!(defs[0].parameters["required"][0], "markdownToSave");
    }

    #[test]
    fn test_store_markdown() {
        let tools = ToolBox::new().unwrap();
        let outcome = tools.invoke(&call(
            STORE_MARKDOWN,
            serde_json::json!({ "markdownToSave": "Epics:\n- Auth ❌" }),
        ));
        assert!(!outcome.is_error());
        assert_eq!(outcome.message.role, MessageRole::Tool);
        assert_eq!(outcome.message.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(outcome.message.content, STORE_ACK);

        let mut state = ConversationState::new();
        outcome.apply(&mut state);
        assert_eq!(state.canvas.read(), "Epics:\n- Auth ❌");
        assert_eq!(state.messages.len(), 1);
    }

    #[test]
    fn test_any_string_is_stored_verbatim() {
        let tools = ToolBox::new().unwrap();
        let outcome = tools.invoke(&call(
            STORE_MARKDOWN,
            serde_json::json!({ "markdownToSave": "  not *really* markdown ``` " }),
        ));
        assert_eq!(outcome.canvas.as_deref(), Some("  not *really* markdown ``` "));
    }

    #[test]
    fn test_rejects_invalid_arguments() {
        let tools = ToolBox::new().unwrap();
        let mut state = ConversationState::new();
        state.canvas.write("before");

        for arguments in [
            serde_json::json!({}),
            serde_json::json!({ "markdownToSave": 42 }),
            serde_json::json!({ "markdown": "# A" }),
            serde_json::Value::String("{not json".to_string()),
        ] {
            let outcome = tools.invoke(&call(STORE_MARKDOWN, arguments));
            assert!(outcome.is_error());
            assert!(outcome.message.content.starts_with("Error:"));
            assert_eq!(outcome.message.tool_call_id.as_deref(), Some("call_1"));
            outcome.apply(&mut state);
        }
        assert_eq!(state.canvas.read(), "before");
        assert_eq!(state.messages.len(), 4);
    }

    #[test]
    fn test_rejects_unknown_tool() {
        let tools = ToolBox::new().unwrap();
        let outcome = tools.invoke(&call("delete_canvas", serde_json::json!({})));
        assert!(outcome.is_error());
        assert!(outcome.message.content.contains("unknown tool"));
    }
}
