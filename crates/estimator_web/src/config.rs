//! Server settings: defaults, then the TOML settings file, then CLI/env.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use estimator_chat::{AgentSettings, GraphSettings, LlmConfig, DEFAULT_API_BASE, DEFAULT_MAX_TOOL_ROUNDS};

use crate::cli::Cli;

pub const DEFAULT_BIND: &str = "127.0.0.1:8501";
pub const DEFAULT_SETTINGS_FILE: &str = "estimator.toml";
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 30 * 60;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Per-agent overrides in the settings file
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AgentSection {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
}

impl AgentSection {
    fn apply(&self, mut settings: AgentSettings) -> AgentSettings {
        if let Some(model) = &self.model {
            settings.model = model.clone();
        }
        if let Some(temperature) = self.temperature {
            settings.temperature = temperature;
        }
        if let Some(max_tokens) = self.max_tokens {
            settings.max_tokens = max_tokens;
        }
        settings
    }
}

/// Contents of `estimator.toml`. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SettingsFile {
    pub bind: Option<String>,
    pub api_base: Option<String>,
    pub idle_timeout_secs: Option<u64>,
    pub max_tool_rounds: Option<usize>,
    pub log_json: Option<bool>,
    pub thinking: AgentSection,
    pub tool: AgentSection,
}

impl SettingsFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Resolved server settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind: String,
    pub api_base: String,
    pub idle_timeout: Duration,
    pub log_json: bool,
    pub graph: GraphSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            log_json: false,
            graph: GraphSettings::default(),
        }
    }
}

impl Settings {
    /// Resolve settings for `cli`. An explicit `--config` must exist; the
    /// default settings file is optional.
    pub fn resolve(cli: &Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => SettingsFile::load(path)?,
            None => {
                let path = Path::new(DEFAULT_SETTINGS_FILE);
                if path.exists() {
                    SettingsFile::load(path)?
                } else {
                    debug!("No {} found, using defaults", DEFAULT_SETTINGS_FILE);
                    SettingsFile::default()
                }
            }
        };
        Self::merge(&file, cli)
    }

    /// Layer `file` and then `cli` over the defaults
    pub fn merge(file: &SettingsFile, cli: &Cli) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let mut thinking = file.thinking.apply(defaults.graph.thinking);
        let mut tool = file.tool.apply(defaults.graph.tool);
        if let Some(model) = &cli.thinking_model {
            thinking.model = model.clone();
        }
        if let Some(model) = &cli.tool_model {
            tool.model = model.clone();
        }

        let idle_timeout_secs = cli
            .idle_timeout_secs
            .or(file.idle_timeout_secs)
            .unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS);
        if idle_timeout_secs == 0 {
            return Err(ConfigError::Invalid("idle_timeout_secs must be positive".to_string()));
        }

        let settings = Self {
            bind: cli.bind.clone().or_else(|| file.bind.clone()).unwrap_or(defaults.bind),
            api_base: cli
                .api_base
                .clone()
                .or_else(|| file.api_base.clone())
                .unwrap_or(defaults.api_base),
            idle_timeout: Duration::from_secs(idle_timeout_secs),
            log_json: cli.log_json || file.log_json.unwrap_or(false),
            graph: GraphSettings {
                thinking,
                tool,
                max_tool_rounds: cli
                    .max_tool_rounds
                    .or(file.max_tool_rounds)
                    .unwrap_or(DEFAULT_MAX_TOOL_ROUNDS),
            },
        };
        Ok(settings)
    }

    /// Endpoint settings; the API key always comes from the environment
    pub fn llm_config(&self) -> LlmConfig {
        let mut config = LlmConfig::from_env();
        config.api_base = self.api_base.clone();
        config
    }
}
