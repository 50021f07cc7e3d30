use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::fetcher::ResourceKind;
use crate::naming::BaseNameOverride;

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
const DEFAULT_ANTHROPIC_URL: &str = "https://api.anthropic.com/v1";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    OpenAI,
    Anthropic,
    /// Any server speaking the OpenAI chat completions API (Ollama, vLLM, LM Studio).
    Custom,
}

impl LlmProvider {
    fn api_key_env(&self) -> Option<&'static str> {
        match self {
            LlmProvider::OpenAI => Some("OPENAI_API_KEY"),
            LlmProvider::Anthropic => Some("ANTHROPIC_API_KEY"),
            LlmProvider::Custom => None,
        }
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            LlmProvider::OpenAI => DEFAULT_OPENAI_URL,
            LlmProvider::Anthropic => DEFAULT_ANTHROPIC_URL,
            LlmProvider::Custom => "http://127.0.0.1:11434/v1",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Falls back to the provider's public endpoint when unset.
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            provider: LlmProvider::OpenAI,
            api_key: None,
            base_url: None,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.1,
            max_tokens: 512,
            request_timeout_secs: 120,
        }
    }
}

impl LlmConfig {
    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or_else(|| self.provider.default_base_url())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Fill `api_key` from the provider's environment variable when the file
    /// did not set one.
    pub fn resolve_api_key(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_some() {
            return;
        }
        if let Some(var) = self.provider.api_key_env() {
            self.api_key = lookup(var).filter(|k| !k.trim().is_empty());
            if self.api_key.is_some() {
                debug!("Using API key from {}", var);
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bind: String,
    /// Browser origins allowed to call the API. Empty disables CORS.
    pub cors_allowed_origins: Vec<String>,
    pub kubeconfig: Option<String>,
    pub context: Option<String>,
    pub log_file: Option<PathBuf>,
    pub refresh_timeout_secs: u64,
    /// Background refresh period. Unset means refresh only on startup and on request.
    pub refresh_interval_secs: Option<u64>,
    pub resource_kinds: Vec<ResourceKind>,
    pub base_name_overrides: Vec<BaseNameOverride>,
    pub llm: LlmConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            bind: "0.0.0.0:8000".to_string(),
            cors_allowed_origins: Vec::new(),
            kubeconfig: None,
            context: None,
            log_file: None,
            refresh_timeout_secs: 120,
            refresh_interval_secs: None,
            resource_kinds: ResourceKind::ALL.to_vec(),
            base_name_overrides: Vec::new(),
            llm: LlmConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_interval_secs.filter(|s| *s > 0).map(Duration::from_secs)
    }
}

pub fn default_config_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("kubeask");
    path.push("config.yaml");
    path
}

/// Load the configuration. An explicitly named file must exist; a missing
/// default file yields the defaults.
pub async fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let (path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (default_config_path(), false),
    };

    if !explicit && !path.exists() {
        debug!("No config at {}, using defaults", path.display());
        return Ok(AppConfig::default());
    }

    let content = fs::read_to_string(&path)
        .await
        .map_err(|source| ConfigError::Read { path: path.clone(), source })?;
    let config = parse_config(&content).map_err(|source| ConfigError::Parse { path: path.clone(), source })?;
    info!("Loaded config from {}", path.display());
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<AppConfig, serde_yaml::Error> {
    if content.trim().is_empty() {
        return Ok(AppConfig::default());
    }
    serde_yaml::from_str(content)
}
