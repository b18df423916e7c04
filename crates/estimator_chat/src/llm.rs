//! LLM adapter for streaming chat completions with tool calling.
//!
//! Talks to an OpenAI-compatible `/chat/completions` endpoint. Text deltas are
//! forwarded to a [`DeltaSink`] as they arrive; the complete reply comes back
//! as a [`ModelReply`].

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{ChatError, ChatResult};
use crate::tools::ToolDefinition;
use crate::types::{AgentRole, Message, MessageRole, ModelReply, ToolCall, TurnEvent};

/// Default OpenAI endpoint
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// One completion request
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub temperature: f32,
    /// Messages including the leading system message
    pub messages: Vec<Message>,
    /// Tools the model may call; empty for plain chat
    pub tools: Vec<ToolDefinition>,
}

/// Forwards streamed text of one agent to the turn's event channel.
#[derive(Debug, Clone)]
pub struct DeltaSink {
    agent: AgentRole,
    tx: mpsc::UnboundedSender<TurnEvent>,
}

impl DeltaSink {
    pub fn new(agent: AgentRole, tx: mpsc::UnboundedSender<TurnEvent>) -> Self {
        Self { agent, tx }
    }

    pub fn agent(&self) -> AgentRole {
        self.agent
    }

    /// Send a text fragment. Fails with `Cancelled` once the consumer is gone.
    pub fn text(&self, delta: &str) -> ChatResult<()> {
        if delta.is_empty() {
            return Ok(());
        }
        self.tx
            .send(TurnEvent::Token {
                agent: self.agent,
                text: delta.to_string(),
            })
            .map_err(|_| ChatError::Cancelled)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A chat model that streams its reply
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run one completion, streaming text deltas into `sink`.
    async fn complete(&self, request: CompletionRequest, sink: &DeltaSink) -> ChatResult<ModelReply>;
}

/// Connection settings for the model endpoint
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub api_base: String,
}

impl LlmConfig {
    /// Read `OPENAI_API_KEY` and `OPENAI_API_BASE` from the environment
    pub fn from_env() -> Self {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.is_empty());
        let api_base = std::env::var("OPENAI_API_BASE")
            .ok()
            .filter(|base| !base.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        Self { api_key, api_base }
    }

    pub fn has_key(&self) -> bool {
        self.api_key.is_some()
    }
}

/// LLM adapter that handles API calls
pub struct LlmAdapter {
    config: LlmConfig,
    client: reqwest::Client,
}

impl LlmAdapter {
    pub fn new(config: LlmConfig) -> ChatResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ChatError::Llm(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.api_base.trim_end_matches('/'))
    }
}

#[async_trait]
impl ChatModel for LlmAdapter {
    async fn complete(&self, request: CompletionRequest, sink: &DeltaSink) -> ChatResult<ModelReply> {
        let api_key = self.config.api_key.as_ref().ok_or(ChatError::LlmNotConfigured)?;
        let body = OpenAIRequest::from_request(&request);

        debug!(
            "Requesting {} for {} with {} messages and {} tools",
            request.model,
            sink.agent().node_name(),
            request.messages.len(),
            request.tools.len()
        );

        let response = self
            .client
            .post(self.completions_url())
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Llm(format!("Network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Llm(format!("OpenAI API error {}: {}", status, body)));
        }

        let mut accumulator = StreamAccumulator::default();
        let mut stream = response.bytes_stream();
        let mut lines = LineBuffer::default();

        while let Some(chunk) = stream.next().await {
            if sink.is_closed() {
                return Err(ChatError::Cancelled);
            }
            let chunk = chunk.map_err(|e| ChatError::Llm(format!("Network error: {}", e)))?;
            lines.push(&chunk);

            while let Some(line) = lines.next_line()? {
                if let Some(delta) = accumulator.feed_line(&line)? {
                    sink.text(&delta)?;
                }
            }
        }
        if let Some(line) = lines.finish()? {
            if let Some(delta) = accumulator.feed_line(&line)? {
                sink.text(&delta)?;
            }
        }

        if !accumulator.is_done() {
            debug!("Stream for {} ended without [DONE]", request.model);
        }
        debug!(
            "Stream for {} finished: {}",
            request.model,
            accumulator.finish_reason().unwrap_or("no finish reason")
        );
        Ok(accumulator.finish())
    }
}

/// Splits a byte stream into lines. Bytes are only decoded once a whole
/// line has arrived, so characters split across chunks stay intact.
#[derive(Debug, Default)]
pub struct LineBuffer {
    bytes: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    /// Take the next complete line, newline included.
    pub fn next_line(&mut self) -> ChatResult<Option<String>> {
        let Some(end) = self.bytes.iter().position(|b| *b == b'\n') else {
            return Ok(None);
        };
        let line: Vec<u8> = self.bytes.drain(..=end).collect();
        decode_line(line).map(Some)
    }

    /// Whatever is left once the stream ends
    pub fn finish(self) -> ChatResult<Option<String>> {
        let rest = decode_line(self.bytes)?;
        if rest.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(rest))
    }
}

fn decode_line(bytes: Vec<u8>) -> ChatResult<String> {
    String::from_utf8(bytes).map_err(|e| ChatError::Stream(format!("Invalid UTF-8 in stream: {}", e)))
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Folds SSE `data:` lines of a streamed completion into a [`ModelReply`].
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    content: String,
    calls: BTreeMap<usize, PartialCall>,
    finish_reason: Option<String>,
    done: bool,
}

impl StreamAccumulator {
    /// Feed one line of the SSE body; returns the text delta it carried.
    pub fn feed_line(&mut self, line: &str) -> ChatResult<Option<String>> {
        let line = line.trim();
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(None);
        };
        let data = data.trim();
        if data.is_empty() {
            return Ok(None);
        }
        if data == "[DONE]" {
            self.done = true;
            return Ok(None);
        }

        let chunk: OpenAIStreamChunk = serde_json::from_str(data)
            .map_err(|e| ChatError::Stream(format!("Failed to parse chunk: {}", e)))?;

        let mut text = String::new();
        for choice in chunk.choices {
            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(reason);
            }
            let Some(delta) = choice.delta else {
                continue;
            };
            if let Some(content) = delta.content {
                text.push_str(&content);
            }
            for call in delta.tool_calls.unwrap_or_default() {
                let index = call.index.unwrap_or(self.calls.len());
                let partial = self.calls.entry(index).or_default();
                if let Some(id) = call.id {
                    partial.id = id;
                }
                if let Some(function) = call.function {
                    if let Some(name) = function.name {
                        partial.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        partial.arguments.push_str(&arguments);
                    }
                }
            }
        }

        if text.is_empty() {
            return Ok(None);
        }
        self.content.push_str(&text);
        Ok(Some(text))
    }

    /// Whether the `[DONE]` sentinel was seen
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref()
    }

    /// Build the reply. Arguments that are not valid JSON are kept as a raw
    /// string so the tool can reject them.
    pub fn finish(self) -> ModelReply {
        if self.calls.is_empty() {
            return ModelReply::Plain {
                content: self.content,
            };
        }

        let calls = self
            .calls
            .into_values()
            .map(|partial| {
                let arguments = if partial.arguments.trim().is_empty() {
                    serde_json::json!({})
                } else {
                    serde_json::from_str(&partial.arguments)
                        .unwrap_or(serde_json::Value::String(partial.arguments))
                };
                ToolCall {
                    id: partial.id,
                    name: partial.name,
                    arguments,
                }
            })
            .collect();

        ModelReply::ToolRequest {
            content: self.content,
            calls,
        }
    }
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OpenAITool>,
}

impl OpenAIRequest {
    fn from_request(request: &CompletionRequest) -> Self {
        Self {
            model: request.model.clone(),
            messages: request.messages.iter().map(OpenAIMessage::from).collect(),
            temperature: request.temperature,
            stream: true,
            tools: request
                .tools
                .iter()
                .map(|tool| OpenAITool {
                    kind: "function",
                    function: OpenAIFunction {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: tool.parameters.clone(),
                    },
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: &'static str,
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OpenAIToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl From<&Message> for OpenAIMessage {
    fn from(message: &Message) -> Self {
        let role = match message.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        };
        // Assistant messages that only carry tool calls send a null content
        let content = if message.content.is_empty() && !message.tool_calls.is_empty() {
            None
        } else {
            Some(message.content.clone())
        };
        let tool_calls = message
            .tool_calls
            .iter()
            .map(|call| OpenAIToolCall {
                id: call.id.clone(),
                kind: "function",
                function: OpenAIFunctionCall {
                    name: call.name.clone(),
                    arguments: match &call.arguments {
                        serde_json::Value::String(raw) => raw.clone(),
                        other => other.to_string(),
                    },
                },
            })
            .collect();

        Self {
            role,
            content,
            tool_calls,
            tool_call_id: message.tool_call_id.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct OpenAIToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: OpenAIFunctionCall,
}

#[derive(Debug, Serialize)]
struct OpenAIFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct OpenAITool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: OpenAIFunction,
}

#[derive(Debug, Serialize)]
struct OpenAIFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChoice {
    #[serde(default)]
    delta: Option<OpenAIDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAIDeltaToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAIDeltaToolCall {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<OpenAIDeltaFunction>,
}

#[derive(Debug, Deserialize)]
struct OpenAIDeltaFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        std::env::remove_var("OPENAI_API_KEY");
        std::env::remove_var("OPENAI_API_BASE");

        let config = LlmConfig::from_env();
        assert!(!config.has_key());
        assert_eq!(config.api_base, DEFAULT_API_BASE);

        std::env::set_var("OPENAI_API_KEY", "test-key");
        std::env::set_var("OPENAI_API_BASE", "http://localhost:9999/v1/");
        let config = LlmConfig::from_env();
        assert_eq!(config.api_key.as_deref(), Some("test-key"));
        let adapter = LlmAdapter::new(config).unwrap();
        assert_eq!(adapter.completions_url(), "http://localhost:9999/v1/chat/completions");

        std::env::remove_var("OPENAI_API_KEY");
        std::env::remove_var("OPENAI_API_BASE");
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_request() {
        let adapter = LlmAdapter::new(LlmConfig {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
        })
        .unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let request = CompletionRequest {
            model: "gpt-4o".to_string(),
            temperature: 0.0,
            messages: vec![Message::user("hi")],
            tools: Vec::new(),
        };
        let err = adapter
            .complete(request, &DeltaSink::new(AgentRole::Thinking, tx))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::LlmNotConfigured));
    }

    #[test]
    fn test_accumulate_text() {
        let mut acc = StreamAccumulator::default();
        let first = acc
            .feed_line(r#"data: {"choices":[{"delta":{"role":"assistant","content":"Hel"}}]}"#)
            .unwrap();
        assert_eq!(first.as_deref(), Some("Hel"));
        acc.feed_line(r#"data: {"choices":[{"delta":{"content":"lo"}}]}"#).unwrap();
        acc.feed_line(r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#).unwrap();
        assert!(acc.feed_line("data: [DONE]").unwrap().is_none());
        assert!(acc.feed_line(": keep-alive").unwrap().is_none());

        assert!(acc.is_done());
        assert_eq!(acc.finish_reason(), Some("stop"));
        assert_eq!(acc.finish(), ModelReply::plain("Hello"));
    }

    #[test]
    fn test_accumulate_tool_calls() {
        let mut acc = StreamAccumulator::default();
        let lines = [
            r##"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","type":"function","function":{"name":"store_markdown","arguments":""}}]}}]}"##,
            r##"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"markdownToSave\":"}}]}}]}"##,
            r##"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"# Epics\"}"}}]}}]}"##,
            r##"data: {"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_b","function":{"name":"store_markdown","arguments":"{broken"}}]}}]}"##,
            r##"data: {"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"##,
        ];
        for line in lines {
            assert!(acc.feed_line(line).unwrap().is_none());
        }

        match acc.finish() {
            ModelReply::ToolRequest { content, calls } => {
                assert!(content.is_empty());
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[0].id, "call_a");
                assert_eq!(calls[0].name, "store_markdown");
                assert_eq!(calls[0].arguments["markdownToSave"], "# Epics");
                assert_eq!(calls[1].arguments, serde_json::json!("{broken"));
            }
            other => panic!("expected tool request, got {:?}", other),
        }
    }

    #[test]
    fn test_line_split_inside_multibyte_char() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"Auth ✅\"}}]}\n";
        let bytes = line.as_bytes();
        // first byte of the three-byte checkmark ends the first chunk
        let split = line.find('✅').unwrap() + 1;

        let mut lines = LineBuffer::default();
        lines.push(&bytes[..split]);
        assert!(lines.next_line().unwrap().is_none());
        lines.push(&bytes[split..]);
        let decoded = lines.next_line().unwrap().unwrap();
        assert!(lines.next_line().unwrap().is_none());
        assert!(lines.finish().unwrap().is_none());

        let mut acc = StreamAccumulator::default();
        assert_eq!(acc.feed_line(&decoded).unwrap().as_deref(), Some("Auth ✅"));
        assert_eq!(acc.finish(), ModelReply::plain("Auth ✅"));
    }

    /// Serves one streamed completion on a local port, each part in its own
    /// HTTP chunk. Returns the API base to point the adapter at.
    async fn serve_chunks(parts: Vec<Vec<u8>>) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text[..head_end]
                        .lines()
                        .filter_map(|line| line.split_once(':'))
                        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + length {
                        break;
                    }
                }
            }

            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n")
                .await
                .unwrap();
            for part in parts {
                socket.write_all(format!("{:x}\r\n", part.len()).as_bytes()).await.unwrap();
                socket.write_all(&part).await.unwrap();
                socket.write_all(b"\r\n").await.unwrap();
                socket.flush().await.unwrap();
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            socket.write_all(b"0\r\n\r\n").await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_complete_keeps_chars_split_across_chunks() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Auth ✅\"}}]}\n\ndata: [DONE]\n\n";
        let split = body.find('✅').unwrap() + 1;
        let api_base = serve_chunks(vec![
            body.as_bytes()[..split].to_vec(),
            body.as_bytes()[split..].to_vec(),
        ])
        .await;

        let adapter = LlmAdapter::new(LlmConfig {
            api_key: Some("test-key".to_string()),
            api_base,
        })
        .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = CompletionRequest {
            model: "gpt-4o".to_string(),
            temperature: 0.0,
            messages: vec![Message::user("status?")],
            tools: Vec::new(),
        };
        let reply = adapter
            .complete(request, &DeltaSink::new(AgentRole::Thinking, tx))
            .await
            .unwrap();

        assert_eq!(reply, ModelReply::plain("Auth ✅"));
        match rx.recv().await {
            Some(TurnEvent::Token { text, .. }) => assert_eq!(text, "Auth ✅"),
            other => panic!("expected token, got {:?}", other),
        }
    }

    #[test]
    fn test_line_buffer_keeps_unterminated_tail() {
        let mut lines = LineBuffer::default();
        lines.push(b"data: [DONE]\n: keep");
        assert_eq!(lines.next_line().unwrap().as_deref(), Some("data: [DONE]\n"));
        assert!(lines.next_line().unwrap().is_none());
        lines.push("-alive ❌".as_bytes());
        assert_eq!(lines.finish().unwrap().as_deref(), Some(": keep-alive ❌"));
    }

    #[test]
    fn test_invalid_utf8_line_is_a_stream_error() {
        let mut lines = LineBuffer::default();
        lines.push(&[b'd', b'a', 0xff, b'\n']);
        assert!(matches!(lines.next_line(), Err(ChatError::Stream(_))));

        let mut lines = LineBuffer::default();
        // a dangling lead byte at the end of the body
        lines.push(&[b'o', b'k', 0xe2]);
        assert!(matches!(lines.finish(), Err(ChatError::Stream(_))));
    }

    #[test]
    fn test_bad_chunk_is_an_error() {
        let mut acc = StreamAccumulator::default();
        let err = acc.feed_line("data: {not json").unwrap_err();
        assert!(matches!(err, ChatError::Stream(_)));
    }

    #[test]
    fn test_request_serialization() {
        let call = ToolCall {
            id: "call_a".to_string(),
            name: "store_markdown".to_string(),
            arguments: serde_json::json!({ "markdownToSave": "# A" }),
        };
        let request = CompletionRequest {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            messages: vec![
                Message::system("sys"),
                Message::user("hi"),
                Message::assistant_with_tools("", vec![call]),
                Message::tool_result("call_a", "ok"),
            ],
            tools: crate::tools::ToolBox::new().unwrap().definitions(),
        };
        let json = serde_json::to_value(OpenAIRequest::from_request(&request)).unwrap();

        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "system");
        assert!(json["messages"][2]["content"].is_null());
        assert_eq!(json["messages"][2]["tool_calls"][0]["type"], "function");
        assert_eq!(
            json["messages"][2]["tool_calls"][0]["function"]["arguments"],
            r##"{"markdownToSave":"# A"}"##
        );
        assert_eq!(json["messages"][3]["role"], "tool");
        assert_eq!(json["messages"][3]["tool_call_id"], "call_a");
        assert_eq!(json["tools"][0]["function"]["name"], "store_markdown");
    }

    #[tokio::test]
    async fn test_sink_reports_closed_consumer() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = DeltaSink::new(AgentRole::Tool, tx);
        sink.text("ok").unwrap();
        drop(rx);
        assert!(sink.is_closed());
        assert!(matches!(sink.text("more"), Err(ChatError::Cancelled)));
        // empty fragments are not sent at all
        assert!(sink.text("").is_ok());
    }
}
