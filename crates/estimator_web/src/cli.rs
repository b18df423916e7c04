//! Command line arguments.
//!
//! Every option can also come from the environment. Unset options fall back
//! to the settings file, then to built-in defaults.

use std::path::PathBuf;

use clap::Parser;

/// Estimator - chat with an AI estimator and watch the outline grow
#[derive(Parser, Debug, Default, Clone)]
#[command(name = "estimator")]
#[command(version, about = "Estimator - two-agent estimation chat")]
#[command(long_about = r#"
Serves a web chat where a thinking agent interviews you about a software
project and a tool agent keeps the resulting outline of epics, features,
open questions and risks in a markdown canvas next to the chat.

The model endpoint is OpenAI-compatible. Set OPENAI_API_KEY (a .env file in
the working directory is read at startup).
"#)]
pub struct Cli {
    /// Settings file (TOML). Defaults to ./estimator.toml when present
    #[arg(short, long, env = "ESTIMATOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long, env = "ESTIMATOR_BIND")]
    pub bind: Option<String>,

    /// Model used by the thinking agent
    #[arg(long, env = "ESTIMATOR_THINKING_MODEL")]
    pub thinking_model: Option<String>,

    /// Model used by the tool agent
    #[arg(long, env = "ESTIMATOR_TOOL_MODEL")]
    pub tool_model: Option<String>,

    /// Base URL of the OpenAI-compatible API
    #[arg(long, env = "OPENAI_API_BASE")]
    pub api_base: Option<String>,

    /// Seconds without activity before a session is dropped
    #[arg(long, env = "ESTIMATOR_IDLE_TIMEOUT_SECS")]
    pub idle_timeout_secs: Option<u64>,

    /// Tool rounds allowed per turn
    #[arg(long, env = "ESTIMATOR_MAX_TOOL_ROUNDS")]
    pub max_tool_rounds: Option<usize>,

    /// Log as JSON lines
    #[arg(long)]
    pub log_json: bool,
}
