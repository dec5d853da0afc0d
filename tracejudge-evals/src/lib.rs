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

//! # Tracejudge Evaluation Engine
//!
//! LLM-as-judge scoring of captured traces.
//!
//! ## Features
//!
//! - **Provider client**: one chat contract over OpenAI, Azure OpenAI,
//!   DashScope, Ollama and any OpenAI-compatible endpoint
//! - **Prompt rendering** of evaluator rubrics with trace input/output
//! - **Tolerant parsing** of judge output with an explicit parse tier
//! - **Bounded concurrency**: per-provider permits shared across jobs
//! - **Job tracking** with incremental progress and a single terminal write
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tracejudge_evals::{EvalConfig, EvalExecutor, HttpProviderFactory, JobService};
//!
//! let factory = Arc::new(HttpProviderFactory::new(config.call_timeout())?);
//! let executor = Arc::new(EvalExecutor::new(store.clone(), store.clone(), factory, config));
//! let service = JobService::new(store.clone(), store.clone(), store.clone(),
//!                               store.clone(), store.clone(), store.clone(), executor);
//! let summary = service.create_job(request).await?;
//! ```

use std::time::Duration;
use thiserror::Error;
use tracejudge_core::StoreError;

pub mod executor;
pub mod parser;
pub mod presets;
pub mod prompt;
pub mod providers;
pub mod results;
pub mod service;
pub mod tracker;

pub use executor::{BatchSummary, EvalExecutor, EvalTask, ProgressSink, TaskOutcome};
pub use parser::{parse, Judgement};
pub use presets::{preset_evaluators, seed_presets};
pub use prompt::render;
pub use providers::{
    Base64Cipher, ChatMessage, ChatProvider, ChatRequest, ChatResponse, CredentialCipher,
    HttpProviderFactory, LlmError, Provider, ProviderFactory, ProviderSettings, Role, TokenUsage,
};
pub use results::{EvaluatorSummary, ScoreSummary, TimeRange, TraceScores, PASS_THRESHOLD};
pub use service::{CreateJobRequest, JobError, JobListItem, JobPage, JobService, JobSummary};
pub use tracker::JobTracker;

/// Errors that fail a single evaluation task
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("LLM configuration not found: {0}")]
    LlmConfigNotFound(String),

    #[error("Provider error: {0}")]
    Provider(#[from] LlmError),

    #[error("Evaluation timed out after {0}s")]
    Timeout(u64),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration for evaluation execution
#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// Concurrent calls allowed per provider kind, across all jobs
    pub max_concurrent_per_provider: usize,

    /// Timeout per LLM call in seconds
    pub call_timeout_secs: u64,

    /// Sampling temperature for judge calls
    pub temperature: f64,

    /// Completion budget for judge calls
    pub max_tokens: u32,
}

impl EvalConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            max_concurrent_per_provider: 4,
            call_timeout_secs: 60,
            temperature: 0.1,
            max_tokens: 512,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_config_default() {
        let config = EvalConfig::default();
        assert_eq!(config.max_concurrent_per_provider, 4);
        assert_eq!(config.call_timeout(), Duration::from_secs(60));
        assert_eq!(config.temperature, 0.1);
        assert_eq!(config.max_tokens, 512);
    }
}
