//! Service configuration (layered: file > env > defaults).

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::{LeibnizError, Result};

fn default_model_base_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_model_name() -> String {
    "llama3.2".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_content_timeout_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

/// Language-model backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Base URL of an OpenAI-compatible chat-completions endpoint.
    #[serde(default = "default_model_base_url")]
    pub base_url: String,
    /// Bearer token; empty means unauthenticated (local backends).
    #[serde(default)]
    pub api_key: String,
    /// Model used when an agent does not name one.
    #[serde(default = "default_model_name")]
    pub default_model: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_model_base_url(),
            api_key: String::new(),
            default_model: default_model_name(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Content-processor side service settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentProcessorConfig {
    /// When false the client is a no-op pass-through.
    #[serde(default)]
    pub enabled: bool,
    /// Base URL of the processing service.
    #[serde(default)]
    pub base_url: String,
    /// Pipeline applied when the caller does not name one.
    #[serde(default)]
    pub default_pipeline: String,
    /// Fixed per-call timeout in seconds.
    #[serde(default = "default_content_timeout_secs")]
    pub timeout_secs: u64,
}

/// One external tool server to spawn and bridge at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<(String, String)>,
}

/// Top-level configuration for the execution service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Directory of declarative agent definition files.
    #[serde(default = "ServiceConfig::default_agents_dir")]
    pub agents_dir: PathBuf,
    /// Watch `agents_dir` and hot-reload definitions.
    #[serde(default = "default_true")]
    pub watch_agents: bool,
    /// SQLite database path; `None` keeps everything in memory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub content_processor: ContentProcessorConfig,
    #[serde(default)]
    pub tool_servers: Vec<ToolServerConfig>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            agents_dir: Self::default_agents_dir(),
            watch_agents: true,
            database_path: None,
            model: ModelConfig::default(),
            content_processor: ContentProcessorConfig::default(),
            tool_servers: Vec::new(),
        }
    }
}

impl ServiceConfig {
    fn default_agents_dir() -> PathBuf {
        ProjectDirs::from("", "", "leibniz")
            .map(|dirs| dirs.data_dir().join("agents"))
            .unwrap_or_else(|| PathBuf::from("agents"))
    }

    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&raw)
            .map_err(|e| LeibnizError::Configuration(format!("invalid config: {e}")))
    }

    /// Build configuration from environment variables.
    ///
    /// Recognised variables: `LEIBNIZ_AGENTS_DIR`, `LEIBNIZ_DB_PATH`,
    /// `LEIBNIZ_MODEL_BASE_URL`, `LEIBNIZ_MODEL`, `LEIBNIZ_API_KEY` (falls
    /// back to `OPENAI_API_KEY`), `LEIBNIZ_CONTENT_URL`.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("LEIBNIZ_AGENTS_DIR") {
            config.agents_dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var("LEIBNIZ_DB_PATH") {
            config.database_path = Some(PathBuf::from(path));
        }
        if let Ok(url) = std::env::var("LEIBNIZ_MODEL_BASE_URL") {
            config.model.base_url = url;
        }
        if let Ok(model) = std::env::var("LEIBNIZ_MODEL") {
            config.model.default_model = model;
        }
        if let Ok(key) = std::env::var("LEIBNIZ_API_KEY").or_else(|_| std::env::var("OPENAI_API_KEY")) {
            config.model.api_key = key;
        }
        if let Ok(url) = std::env::var("LEIBNIZ_CONTENT_URL") {
            config.content_processor.enabled = true;
            config.content_processor.base_url = url;
        }

        config
    }

    /// Per-request model timeout as a [`Duration`].
    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model.request_timeout_secs)
    }

    /// Per-call content-processor timeout as a [`Duration`].
    pub fn content_timeout(&self) -> Duration {
        Duration::from_secs(self.content_processor.timeout_secs)
    }
}
