//! Estimator server - Main entry point.
//!
//! Exit codes:
//! - 0: Clean shutdown
//! - 1: Startup or server error
//! - 2: Invalid settings

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use estimator_chat::{ChatManager, ConversationGraph, LlmAdapter};
use estimator_web::{build_app, AppState, Cli, Settings};

pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_SETTINGS: u8 = 2;
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let settings = match Settings::resolve(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            return ExitCode::from(ExitCodes::INVALID_SETTINGS);
        }
    };

    if let Err(e) = init_tracing(settings.log_json) {
        eprintln!("❌ Error: {:#}", e);
        return ExitCode::from(ExitCodes::GENERAL_ERROR);
    }

    match run(settings).await {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            ExitCode::from(ExitCodes::GENERAL_ERROR)
        }
    }
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("estimator=info,warn"))
        .context("invalid log filter")?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry.with(fmt::layer().json().with_target(false)).try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };
    if result.is_err() {
        // Logging already initialized, continue
    }
    Ok(())
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    let llm_config = settings.llm_config();
    if !llm_config.has_key() {
        warn!("OPENAI_API_KEY is not set; turns will fail until it is configured");
    }
    let model = Arc::new(LlmAdapter::new(llm_config)?);

    let graph = ConversationGraph::with_model(model, settings.graph.clone())?;
    debug!("Conversation graph:\n{}", graph.describe_mermaid());

    let manager = Arc::new(ChatManager::new(graph));
    let sweeper = manager.spawn_idle_sweeper(settings.idle_timeout);

    let app = build_app(AppState {
        manager,
        model: settings.graph.thinking.model.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&settings.bind)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind))?;
    info!("Estimator listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    sweeper.abort();
    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
