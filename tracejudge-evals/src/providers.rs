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

//! Provider client: one chat contract over heterogeneous LLM backends.
//!
//! Each backend speaks its own request/response envelope. [`Provider`] picks
//! the variant from a persisted [`LlmConfig`] and every variant normalizes
//! its envelope into [`ChatResponse`].

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracejudge_core::{LlmConfig, ProviderKind};
use tracing::debug;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DASHSCOPE_BASE_URL: &str = "https://dashscope.aliyuncs.com/api/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";
const AZURE_API_VERSION: &str = "2024-02-01";

const DEFAULT_TEMPERATURE: f64 = 0.7;
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Errors from LLM provider calls
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("{provider} API error ({status}): {message}")]
    Api {
        provider: ProviderKind,
        status: u16,
        message: String,
    },

    #[error("{0} provider requires an endpoint")]
    MissingEndpoint(ProviderKind),

    #[error("LLM call timed out")]
    Timeout,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Credential error: {0}")]
    Credential(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Sampling parameters left as `None` fall back to per-provider defaults
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub usage: TokenUsage,
    pub model: String,
    pub finish_reason: String,
}

/// Uniform chat contract
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;

    /// Send a one-message probe; any error means the backend is unusable
    async fn test_connection(&self) -> bool {
        let probe = ChatRequest {
            messages: vec![ChatMessage::user("Hello")],
            max_tokens: Some(10),
            ..Default::default()
        };
        match self.chat(probe).await {
            Ok(_) => true,
            Err(e) => {
                debug!(provider = %self.kind(), "Connection test failed: {}", e);
                false
            }
        }
    }
}

/// Connection details shared by every variant
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    pub model: String,
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub options: Map<String, Value>,
}

impl ProviderSettings {
    fn base_url(&self, default: &str) -> String {
        self.endpoint
            .as_deref()
            .filter(|e| !e.is_empty())
            .unwrap_or(default)
            .trim_end_matches('/')
            .to_string()
    }

    fn require_endpoint(&self, kind: ProviderKind) -> Result<String, LlmError> {
        match self.endpoint.as_deref().filter(|e| !e.is_empty()) {
            Some(endpoint) => Ok(endpoint.trim_end_matches('/').to_string()),
            None => Err(LlmError::MissingEndpoint(kind)),
        }
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.api_key.as_deref().unwrap_or_default())
    }
}

/// POST a JSON body and return the decoded JSON response.
///
/// Non-2xx responses become [`LlmError::Api`] carrying the upstream message
/// when the body has one.
async fn post_json(
    provider: ProviderKind,
    request: reqwest::RequestBuilder,
    body: &Value,
) -> Result<Value, LlmError> {
    let response = request
        .header("Content-Type", "application/json")
        .json(body)
        .send()
        .await
        .map_err(map_transport_error)?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        return Err(LlmError::Api {
            provider,
            status: status.as_u16(),
            message: upstream_message(&error_text)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string()),
        });
    }

    let text = response.text().await.map_err(map_transport_error)?;
    Ok(serde_json::from_str(&text)?)
}

fn map_transport_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout
    } else {
        LlmError::Http(e)
    }
}

fn upstream_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value["error"]["message"]
        .as_str()
        .or_else(|| value["message"].as_str())
        .or_else(|| value["error"].as_str())
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}

/// Decode the `choices[0].message` envelope shared by OpenAI-compatible APIs
fn parse_completions_envelope(data: &Value, fallback_model: &str) -> Result<ChatResponse, LlmError> {
    let choice = &data["choices"][0];
    let content = choice["message"]["content"]
        .as_str()
        .ok_or_else(|| LlmError::InvalidResponse("Missing choices[0].message.content".to_string()))?
        .to_string();

    let usage = &data["usage"];
    let prompt_tokens = usage["prompt_tokens"].as_u64().unwrap_or(0);
    let completion_tokens = usage["completion_tokens"].as_u64().unwrap_or(0);
    let total_tokens = usage["total_tokens"]
        .as_u64()
        .unwrap_or(prompt_tokens + completion_tokens);

    Ok(ChatResponse {
        content,
        usage: TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        },
        model: data["model"].as_str().unwrap_or(fallback_model).to_string(),
        finish_reason: choice["finish_reason"].as_str().unwrap_or("stop").to_string(),
    })
}

/// OpenAI chat completions
pub struct OpenAiProvider {
    settings: ProviderSettings,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(settings: ProviderSettings, client: reqwest::Client) -> Self {
        Self { settings, client }
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let url = format!("{}/chat/completions", self.settings.base_url(OPENAI_BASE_URL));
        let body = json!({
            "model": self.settings.model,
            "messages": request.messages,
            "temperature": request.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "top_p": request.top_p.unwrap_or(1.0),
        });

        let data = post_json(
            self.kind(),
            self.client
                .post(url)
                .header("Authorization", self.settings.bearer()),
            &body,
        )
        .await?;
        parse_completions_envelope(&data, &self.settings.model)
    }
}

/// Azure-hosted OpenAI deployments. The model name is the deployment name.
pub struct AzureProvider {
    settings: ProviderSettings,
    endpoint: String,
    client: reqwest::Client,
}

impl AzureProvider {
    pub fn new(settings: ProviderSettings, client: reqwest::Client) -> Result<Self, LlmError> {
        let endpoint = settings.require_endpoint(ProviderKind::Azure)?;
        Ok(Self {
            settings,
            endpoint,
            client,
        })
    }
}

#[async_trait]
impl ChatProvider for AzureProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Azure
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, self.settings.model, AZURE_API_VERSION
        );
        let body = json!({
            "messages": request.messages,
            "temperature": request.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "top_p": request.top_p.unwrap_or(1.0),
        });

        let data = post_json(
            self.kind(),
            self.client.post(url).header(
                "api-key",
                self.settings.api_key.as_deref().unwrap_or_default(),
            ),
            &body,
        )
        .await?;
        parse_completions_envelope(&data, &self.settings.model)
    }
}

/// Alibaba DashScope text generation
pub struct DashScopeProvider {
    settings: ProviderSettings,
    client: reqwest::Client,
}

impl DashScopeProvider {
    pub fn new(settings: ProviderSettings, client: reqwest::Client) -> Self {
        Self { settings, client }
    }
}

#[async_trait]
impl ChatProvider for DashScopeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::DashScope
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let url = format!(
            "{}/services/aigc/text-generation/generation",
            self.settings.base_url(DASHSCOPE_BASE_URL)
        );
        let body = json!({
            "model": self.settings.model,
            "input": { "messages": request.messages },
            "parameters": {
                "temperature": request.temperature.unwrap_or(DEFAULT_TEMPERATURE),
                "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
                "top_p": request.top_p.unwrap_or(0.8),
                "result_format": "message",
            },
        });

        let data = post_json(
            self.kind(),
            self.client
                .post(url)
                .header("Authorization", self.settings.bearer()),
            &body,
        )
        .await?;

        // DashScope reports some failures in a 200 body
        if let Some(code) = data["code"].as_str().filter(|c| !c.is_empty()) {
            return Err(LlmError::Api {
                provider: self.kind(),
                status: 200,
                message: data["message"].as_str().unwrap_or(code).to_string(),
            });
        }

        let choice = &data["output"]["choices"][0];
        let content = choice["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                LlmError::InvalidResponse("Missing output.choices[0].message.content".to_string())
            })?
            .to_string();
        let prompt_tokens = data["usage"]["input_tokens"].as_u64().unwrap_or(0);
        let completion_tokens = data["usage"]["output_tokens"].as_u64().unwrap_or(0);

        Ok(ChatResponse {
            content,
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
            model: self.settings.model.clone(),
            finish_reason: choice["finish_reason"].as_str().unwrap_or("stop").to_string(),
        })
    }
}

/// Local Ollama daemon, non-streaming
pub struct OllamaProvider {
    settings: ProviderSettings,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(settings: ProviderSettings, client: reqwest::Client) -> Self {
        Self { settings, client }
    }
}

#[async_trait]
impl ChatProvider for OllamaProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let url = format!("{}/api/chat", self.settings.base_url(OLLAMA_BASE_URL));
        let body = json!({
            "model": self.settings.model,
            "messages": request.messages,
            "stream": false,
            "options": {
                "temperature": request.temperature.unwrap_or(DEFAULT_TEMPERATURE),
                "num_predict": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
                "top_p": request.top_p.unwrap_or(0.9),
            },
        });

        let data = post_json(self.kind(), self.client.post(url), &body).await?;

        let content = data["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::InvalidResponse("Missing message.content".to_string()))?
            .to_string();
        let prompt_tokens = data["prompt_eval_count"].as_u64().unwrap_or(0);
        let completion_tokens = data["eval_count"].as_u64().unwrap_or(0);
        let done = data["done"].as_bool().unwrap_or(false);

        Ok(ChatResponse {
            content,
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
            model: data["model"]
                .as_str()
                .unwrap_or(&self.settings.model)
                .to_string(),
            finish_reason: if done { "stop" } else { "length" }.to_string(),
        })
    }
}

/// Any OpenAI-compatible endpoint. Provider options are merged into the
/// request body last, so they override the sampling defaults.
pub struct CustomProvider {
    settings: ProviderSettings,
    endpoint: String,
    client: reqwest::Client,
}

impl CustomProvider {
    pub fn new(settings: ProviderSettings, client: reqwest::Client) -> Result<Self, LlmError> {
        let endpoint = settings.require_endpoint(ProviderKind::Custom)?;
        Ok(Self {
            settings,
            endpoint,
            client,
        })
    }
}

#[async_trait]
impl ChatProvider for CustomProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Custom
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let url = format!("{}/chat/completions", self.endpoint);
        let mut body = Map::new();
        body.insert("model".into(), json!(self.settings.model));
        body.insert("messages".into(), serde_json::to_value(&request.messages)?);
        body.insert(
            "temperature".into(),
            json!(request.temperature.unwrap_or(DEFAULT_TEMPERATURE)),
        );
        body.insert(
            "max_tokens".into(),
            json!(request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
        );
        body.insert("top_p".into(), json!(request.top_p.unwrap_or(1.0)));
        for (key, value) in &self.settings.options {
            body.insert(key.clone(), value.clone());
        }

        let mut builder = self.client.post(url);
        if self.settings.api_key.as_deref().is_some_and(|k| !k.is_empty()) {
            builder = builder.header("Authorization", self.settings.bearer());
        }

        let data = post_json(self.kind(), builder, &Value::Object(body)).await?;
        parse_completions_envelope(&data, &self.settings.model)
    }
}

/// Closed set of backends, selected by [`ProviderKind`]
pub enum Provider {
    OpenAi(OpenAiProvider),
    Azure(AzureProvider),
    DashScope(DashScopeProvider),
    Ollama(OllamaProvider),
    Custom(CustomProvider),
}

impl Provider {
    pub fn new(
        kind: ProviderKind,
        settings: ProviderSettings,
        client: reqwest::Client,
    ) -> Result<Self, LlmError> {
        Ok(match kind {
            ProviderKind::OpenAi => Provider::OpenAi(OpenAiProvider::new(settings, client)),
            ProviderKind::Azure => Provider::Azure(AzureProvider::new(settings, client)?),
            ProviderKind::DashScope => {
                Provider::DashScope(DashScopeProvider::new(settings, client))
            }
            ProviderKind::Ollama => Provider::Ollama(OllamaProvider::new(settings, client)),
            ProviderKind::Custom => Provider::Custom(CustomProvider::new(settings, client)?),
        })
    }

    /// Build from a persisted config, decoding its stored credential
    pub fn from_config(
        config: &LlmConfig,
        cipher: &dyn CredentialCipher,
        client: reqwest::Client,
    ) -> Result<Self, LlmError> {
        let api_key = if config.credential_encrypted.is_empty() {
            None
        } else {
            Some(cipher.decrypt(&config.credential_encrypted)?)
        };
        let settings = ProviderSettings {
            model: config.model_name.clone(),
            api_key,
            endpoint: config.endpoint.clone(),
            options: config.options.as_object().cloned().unwrap_or_default(),
        };
        Self::new(config.provider, settings, client)
    }

    fn inner(&self) -> &dyn ChatProvider {
        match self {
            Provider::OpenAi(p) => p,
            Provider::Azure(p) => p,
            Provider::DashScope(p) => p,
            Provider::Ollama(p) => p,
            Provider::Custom(p) => p,
        }
    }
}

#[async_trait]
impl ChatProvider for Provider {
    fn kind(&self) -> ProviderKind {
        self.inner().kind()
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        self.inner().chat(request).await
    }
}

/// Reversible encoding of stored credentials
pub trait CredentialCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> String;

    fn decrypt(&self, stored: &str) -> Result<String, LlmError>;
}

/// Base64 credential encoding.
///
/// This only keeps keys out of casual view in snapshots; it is not
/// encryption. Swap in a real cipher behind [`CredentialCipher`] for that.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Cipher;

impl CredentialCipher for Base64Cipher {
    fn encrypt(&self, plaintext: &str) -> String {
        STANDARD.encode(plaintext.as_bytes())
    }

    fn decrypt(&self, stored: &str) -> Result<String, LlmError> {
        let bytes = STANDARD
            .decode(stored.trim())
            .map_err(|e| LlmError::Credential(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| LlmError::Credential(e.to_string()))
    }
}

/// Builds chat providers for LLM configs
pub trait ProviderFactory: Send + Sync {
    fn build(&self, config: &LlmConfig) -> Result<Arc<dyn ChatProvider>, LlmError>;
}

/// Factory producing real HTTP providers over one shared connection pool
pub struct HttpProviderFactory {
    client: reqwest::Client,
    cipher: Arc<dyn CredentialCipher>,
}

impl HttpProviderFactory {
    /// Every request made by the built providers is bounded by `timeout`
    pub fn new(timeout: Duration) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            cipher: Arc::new(Base64Cipher),
        })
    }

    pub fn with_cipher(mut self, cipher: Arc<dyn CredentialCipher>) -> Self {
        self.cipher = cipher;
        self
    }
}

impl ProviderFactory for HttpProviderFactory {
    fn build(&self, config: &LlmConfig) -> Result<Arc<dyn ChatProvider>, LlmError> {
        let provider = Provider::from_config(config, self.cipher.as_ref(), self.client.clone())?;
        Ok(Arc::new(provider))
    }
}
