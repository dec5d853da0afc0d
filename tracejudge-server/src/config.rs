// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracejudge_core::{LlmConfig, ProviderKind};
use tracejudge_evals::{CredentialCipher, EvalConfig};

/// Id of the backend added from `OPENAI_API_KEY`
pub const OPENAI_DEFAULT_CONFIG_ID: &str = "openai-default";

/// Tracejudge Server Configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: HttpServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    /// Named judge backends
    #[serde(default)]
    pub llm_configs: Vec<LlmBackendConfig>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpServerConfig {
    /// HTTP API listen address (e.g., "127.0.0.1:47200")
    #[serde(default = "default_http_addr")]
    pub listen_addr: String,

    /// Enable CORS
    #[serde(default = "default_enable_cors")]
    pub enable_cors: bool,

    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_http_addr(),
            enable_cors: default_enable_cors(),
            log_format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Path to the data directory
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Persist the store as a JSON snapshot under `data_dir`
    #[serde(default = "default_snapshot")]
    pub snapshot: bool,

    /// Seconds between background snapshot flushes
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            snapshot: default_snapshot(),
            flush_interval_secs: default_flush_interval(),
        }
    }
}

impl StorageConfig {
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("tracejudge.json")
    }
}

/// Langfuse-style key pair owned by one project
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProjectKeys {
    pub project_id: String,
    pub public_key: String,
    pub secret_key: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Enable authentication (default: false for development)
    #[serde(default)]
    pub enabled: bool,

    /// Basic-auth key pairs for the public ingestion API
    #[serde(default)]
    pub projects: Vec<ProjectKeys>,

    /// Static API keys (format: "key:project_id")
    #[serde(default)]
    pub api_keys: Vec<String>,

    /// Project every request is attributed to while auth is disabled
    #[serde(default = "default_project")]
    pub default_project: String,

    /// Webhook signing secrets by connection id
    #[serde(default)]
    pub webhook_secrets: HashMap<String, String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            projects: Vec::new(),
            api_keys: Vec::new(),
            default_project: default_project(),
            webhook_secrets: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestionConfig {
    /// Largest accepted event batch
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Reject events without `body.traceId` instead of filing them under their own id
    #[serde(default)]
    pub reject_orphan_events: bool,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            reject_orphan_events: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvaluationConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_per_provider: usize,

    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Install the preset evaluators at startup
    #[serde(default = "default_seed_presets")]
    pub seed_presets: bool,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_per_provider: default_max_concurrent(),
            call_timeout_secs: default_call_timeout(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            seed_presets: default_seed_presets(),
        }
    }
}

impl EvaluationConfig {
    pub fn eval_config(&self) -> EvalConfig {
        EvalConfig {
            max_concurrent_per_provider: self.max_concurrent_per_provider,
            call_timeout_secs: self.call_timeout_secs,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// Judge backend declared in the config file.
///
/// The plaintext `api_key` is only held here; it is encoded before the
/// backend reaches the store.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmBackendConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    pub provider: ProviderKind,
    pub model_name: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_options")]
    pub options: serde_json::Value,
    #[serde(default)]
    pub is_default: bool,
}

impl LlmBackendConfig {
    /// Backends without a project are shared by every project
    pub fn to_llm_config(&self, cipher: &dyn CredentialCipher) -> LlmConfig {
        LlmConfig {
            id: self.id.clone(),
            name: self.name.clone().unwrap_or_else(|| self.id.clone()),
            project_id: self.project_id.clone().unwrap_or_default(),
            provider: self.provider,
            model_name: self.model_name.clone(),
            endpoint: self.endpoint.clone(),
            credential_encrypted: self
                .api_key
                .as_deref()
                .map(|key| cipher.encrypt(key))
                .unwrap_or_default(),
            options: self.options.clone(),
            is_default: self.is_default,
            created_at: chrono::Utc::now(),
        }
    }
}

// Default values
fn default_http_addr() -> String {
    "127.0.0.1:47200".to_string()
}

fn default_enable_cors() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./tracejudge-data")
}

fn default_snapshot() -> bool {
    true
}

fn default_flush_interval() -> u64 {
    5
}

fn default_project() -> String {
    "default".to_string()
}

fn default_max_batch_size() -> usize {
    1000
}

fn default_max_concurrent() -> usize {
    4
}

fn default_call_timeout() -> u64 {
    60
}

fn default_temperature() -> f64 {
    0.1
}

fn default_max_tokens() -> u32 {
    512
}

fn default_seed_presets() -> bool {
    true
}

fn default_options() -> serde_json::Value {
    serde_json::json!({})
}

impl ServerConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from environment variables
    ///
    /// Supported environment variables:
    /// - TRACEJUDGE_HTTP_ADDR: HTTP listen address (default: 127.0.0.1:47200)
    /// - TRACEJUDGE_DATA_DIR: Data directory path (default: ./tracejudge-data)
    /// - TRACEJUDGE_AUTH_ENABLED: Enable authentication (default: false)
    /// - TRACEJUDGE_API_KEYS: Comma-separated API keys (format: key:project_id)
    /// - TRACEJUDGE_MAX_CONCURRENCY: Judge calls in flight per provider (default: 4)
    /// - TRACEJUDGE_CALL_TIMEOUT: Judge call timeout in seconds (default: 60)
    /// - OPENAI_API_KEY: adds the `openai-default` judge backend
    pub fn from_env() -> Self {
        let mut config = Self::default();
        Self::apply_env(&mut config);
        config
    }

    /// Load configuration with priority: env > file > defaults
    pub fn load(config_file: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = config_file {
            if path.exists() {
                tracing::info!("Loading configuration from file: {:?}", path);
                Self::from_file(&path)?
            } else {
                tracing::warn!("Config file not found: {:?}, using defaults", path);
                Self::default()
            }
        } else {
            Self::default()
        };

        Self::apply_env(&mut config);
        Ok(config)
    }

    /// Overwrite only the fields whose variables are set
    fn apply_env(config: &mut Self) {
        if let Ok(addr) = std::env::var("TRACEJUDGE_HTTP_ADDR") {
            config.server.listen_addr = addr;
        }

        if let Ok(data_dir) = std::env::var("TRACEJUDGE_DATA_DIR") {
            config.storage.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(enabled) = std::env::var("TRACEJUDGE_AUTH_ENABLED") {
            config.auth.enabled = enabled.parse().unwrap_or(false);
        }

        if let Ok(keys) = std::env::var("TRACEJUDGE_API_KEYS") {
            config.auth.api_keys = keys
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from)
                .collect();
        }

        if let Ok(value) = std::env::var("TRACEJUDGE_MAX_CONCURRENCY") {
            if let Ok(val) = value.parse() {
                config.evaluation.max_concurrent_per_provider = val;
            }
        }

        if let Ok(value) = std::env::var("TRACEJUDGE_CALL_TIMEOUT") {
            if let Ok(val) = value.parse() {
                config.evaluation.call_timeout_secs = val;
            }
        }

        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            config.add_openai_default(key);
        }
    }

    /// Register the `openai-default` backend unless one is declared already
    pub fn add_openai_default(&mut self, api_key: String) {
        if self
            .llm_configs
            .iter()
            .any(|c| c.id == OPENAI_DEFAULT_CONFIG_ID)
        {
            return;
        }
        let is_default = !self.llm_configs.iter().any(|c| c.is_default);
        self.llm_configs.push(LlmBackendConfig {
            id: OPENAI_DEFAULT_CONFIG_ID.to_string(),
            name: Some("OpenAI".to_string()),
            project_id: None,
            provider: ProviderKind::OpenAi,
            model_name: "gpt-4o-mini".to_string(),
            endpoint: None,
            api_key: Some(api_key),
            options: default_options(),
            is_default,
        });
    }

    /// Parse listen address as SocketAddr
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(self.server.listen_addr.parse()?)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;

        if self.auth.enabled && self.auth.projects.is_empty() && self.auth.api_keys.is_empty() {
            anyhow::bail!("Authentication enabled but no project keys or API keys configured");
        }

        for key in &self.auth.api_keys {
            match key.split_once(':') {
                Some((k, p)) if !k.is_empty() && !p.is_empty() => {}
                _ => anyhow::bail!("API key entries must look like key:project_id"),
            }
        }

        if self.evaluation.max_concurrent_per_provider == 0 {
            anyhow::bail!("evaluation.max_concurrent_per_provider must be greater than 0");
        }

        if self.ingestion.max_batch_size == 0 {
            anyhow::bail!("ingestion.max_batch_size must be greater than 0");
        }

        for backend in &self.llm_configs {
            if backend.provider.requires_endpoint() && backend.endpoint.is_none() {
                anyhow::bail!(
                    "LLM config '{}' uses provider {} which requires an endpoint",
                    backend.id,
                    backend.provider
                );
            }
        }

        if self.storage.snapshot && !self.storage.data_dir.exists() {
            std::fs::create_dir_all(&self.storage.data_dir)?;
        }

        Ok(())
    }
}
