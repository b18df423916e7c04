//! # estimator_web - Web chat for the estimator
//!
//! Serves a single page with the chat on the right and the markdown canvas on
//! the left, plus a small JSON/SSE API over [`estimator_chat::ChatManager`].

pub mod cli;
pub mod config;
pub mod routes;

pub use cli::Cli;
pub use config::{ConfigError, Settings};
pub use routes::{build_app, ApiError, AppState};
