//! Error types for the chat pipeline.

use thiserror::Error;

/// Result type for chat operations
pub type ChatResult<T> = Result<T, ChatError>;

/// Chat pipeline errors
#[derive(Error, Debug)]
pub enum ChatError {
    /// Session not found (never created, ended, or evicted)
    #[error("Chat session not found: {0}")]
    SessionNotFound(String),

    /// No API key for the model endpoint
    #[error("LLM not configured. Set OPENAI_API_KEY")]
    LlmNotConfigured,

    /// Model request failed (network, auth, rate limit, bad response)
    #[error("LLM error: {0}")]
    Llm(String),

    /// The streamed response could not be decoded
    #[error("Stream error: {0}")]
    Stream(String),

    /// A tool could not be set up or executed
    #[error("Tool error: {0}")]
    Tool(String),

    /// The tool agent kept requesting tools past the per-turn cap
    #[error("Tool agent exceeded {0} tool rounds in one turn")]
    ToolRoundsExceeded(usize),

    /// The turn was cancelled (client left, new turn submitted, session ended)
    #[error("Turn cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ChatError {
    /// Whether the error is a cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
