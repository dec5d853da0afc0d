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

//! LLM backend bindings.
//!
//! A [`LlmConfig`] names one backend a project can evaluate with. The
//! credential is stored encoded; decoding happens only when a provider client
//! is built from the config.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Provider discriminator.
///
/// Parsing is strict: an unrecognized name is an error, never a fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Azure,
    DashScope,
    Ollama,
    Custom,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unsupported LLM provider: {0}")]
pub struct UnknownProvider(pub String);

impl ProviderKind {
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::OpenAi,
        ProviderKind::Azure,
        ProviderKind::DashScope,
        ProviderKind::Ollama,
        ProviderKind::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Azure => "azure",
            ProviderKind::DashScope => "dashscope",
            ProviderKind::Ollama => "ollama",
            ProviderKind::Custom => "custom",
        }
    }

    /// Endpoint is mandatory for these kinds
    pub fn requires_endpoint(&self) -> bool {
        matches!(self, ProviderKind::Azure | ProviderKind::Custom)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "azure" => Ok(ProviderKind::Azure),
            "dashscope" => Ok(ProviderKind::DashScope),
            "ollama" => Ok(ProviderKind::Ollama),
            "custom" => Ok(ProviderKind::Custom),
            _ => Err(UnknownProvider(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    pub id: String,
    pub name: String,
    /// Owning project; empty for a backend shared by every project
    #[serde(default)]
    pub project_id: String,
    pub provider: ProviderKind,
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Encoded credential, empty when the backend needs none
    #[serde(default)]
    pub credential_encrypted: String,
    /// Free-form provider options; merged into the request body by `custom`
    #[serde(default = "empty_object")]
    pub options: serde_json::Value,
    #[serde(default)]
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

impl LlmConfig {
    /// Owned by `project_id`, or shared (no owning project)
    pub fn usable_by(&self, project_id: &str) -> bool {
        self.project_id.is_empty() || self.project_id == project_id
    }
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parse() {
        for kind in ProviderKind::ALL {
            assert_eq!(kind.as_str().parse::<ProviderKind>(), Ok(kind));
        }
        assert_eq!("OpenAI".parse::<ProviderKind>(), Ok(ProviderKind::OpenAi));
        assert_eq!(
            "anthropic".parse::<ProviderKind>(),
            Err(UnknownProvider("anthropic".to_string()))
        );
    }

    #[test]
    fn test_serde_discriminator_is_lowercase() {
        let json = serde_json::to_string(&ProviderKind::DashScope).unwrap();
        assert_eq!(json, "\"dashscope\"");
        assert!(serde_json::from_str::<ProviderKind>("\"bedrock\"").is_err());
    }

    #[test]
    fn test_usable_by_owner_or_when_shared() {
        let mut config = LlmConfig {
            id: "llm-1".into(),
            name: "judge".into(),
            project_id: "p1".into(),
            provider: ProviderKind::Ollama,
            model_name: "qwen2".into(),
            endpoint: None,
            credential_encrypted: String::new(),
            options: empty_object(),
            is_default: true,
            created_at: Utc::now(),
        };
        assert!(config.usable_by("p1"));
        assert!(!config.usable_by("p2"));

        config.project_id.clear();
        assert!(config.usable_by("p2"));
    }

    #[test]
    fn test_endpoint_requirement() {
        assert!(ProviderKind::Azure.requires_endpoint());
        assert!(ProviderKind::Custom.requires_endpoint());
        assert!(!ProviderKind::Ollama.requires_endpoint());
    }
}
