//! # estimator_chat - Two-agent estimation chat
//!
//! This crate provides the conversation pipeline behind the estimator:
//! - A **thinking agent** that interviews the user and keeps an outline of
//!   epics, features, open questions and risks at the top of every answer
//! - A **tool agent** that stores fenced markdown blocks into the canvas
//!   through the `store_markdown` tool
//! - A **conversation graph** wiring both agents and the tool together
//! - **Sessions** kept in memory, one per client, with streamed turns
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │   ChatManager   │────▶│ConversationGraph│────▶│  ThinkingAgent  │
//! └────────┬────────┘     └────────┬────────┘     └─────────────────┘
//!          │                       │
//!          ▼                       ▼
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │  SessionStore   │     │    ToolAgent    │────▶│     ToolBox     │
//! │ state + canvas  │     └────────┬────────┘     │ store_markdown  │
//! └─────────────────┘              │              └─────────────────┘
//!                                  ▼
//!                         ┌─────────────────┐
//!                         │   LlmAdapter    │
//!                         │ (SSE streaming) │
//!                         └─────────────────┘
//! ```

pub mod agents;
pub mod canvas;
pub mod error;
pub mod graph;
pub mod llm;
pub mod markdown;
pub mod outline;
pub mod session;
pub mod state;
pub mod tools;
pub mod trim;
pub mod types;

pub use agents::*;
pub use canvas::*;
pub use error::*;
pub use graph::*;
pub use llm::*;
pub use session::*;
pub use state::*;
pub use tools::*;
pub use trim::*;
pub use types::*;
