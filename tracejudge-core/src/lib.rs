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

//! Tracejudge Core
//!
//! Fundamental data structures shared by ingestion and evaluation:
//! traces with their observations, evaluator templates, LLM backend
//! bindings, evaluation jobs and scores, plus the store contracts every
//! persistence backend implements.

pub mod dataset;
pub mod error;
pub mod evaluator;
pub mod job;
pub mod llm_config;
pub mod score;
pub mod store;
pub mod trace;

pub use dataset::DatasetItem;
pub use error::{Result, StoreError};
pub use evaluator::{EvaluatorTemplate, ScoreType};
pub use job::{EvalJob, JobSource, JobStatus, SourceType};
pub use llm_config::{LlmConfig, ProviderKind, UnknownProvider};
pub use score::{ParseTier, Score};
pub use store::{DatasetStore, EvaluatorStore, JobStore, LlmConfigStore, ScoreStore, TraceStore};
pub use trace::{
    Observation, ObservationKind, ObservationStatus, TokenBreakdown, Trace, TRACE_STATUS_ERROR,
    TRACE_STATUS_SUCCESS,
};
