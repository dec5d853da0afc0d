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

//! Persistence contracts.
//!
//! Components receive these as `Arc<dyn ...>` handles; nothing in the
//! ingestion or evaluation paths reaches for a global store.

use crate::dataset::DatasetItem;
use crate::error::Result;
use crate::evaluator::EvaluatorTemplate;
use crate::job::{EvalJob, JobStatus};
use crate::llm_config::LlmConfig;
use crate::score::Score;
use crate::trace::Trace;
use async_trait::async_trait;

#[async_trait]
pub trait TraceStore: Send + Sync {
    async fn get_trace(&self, id: &str) -> Result<Option<Trace>>;

    /// Insert or replace by id
    async fn put_trace(&self, trace: Trace) -> Result<()>;

    /// Newest first
    async fn list_traces(&self, project_id: &str, limit: usize, offset: usize)
        -> Result<Vec<Trace>>;
}

/// Append-only score storage
#[async_trait]
pub trait ScoreStore: Send + Sync {
    /// Fails with `Conflict` if the id already exists
    async fn append_score(&self, score: Score) -> Result<()>;

    async fn scores_by_job(&self, job_id: &str) -> Result<Vec<Score>>;

    async fn scores_by_trace(&self, trace_id: &str) -> Result<Vec<Score>>;

    /// Newest first
    async fn list_scores(&self, project_id: &str, limit: usize, offset: usize)
        -> Result<Vec<Score>>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, job: EvalJob) -> Result<()>;

    /// Replace an existing job. A job already in a terminal state is never
    /// rewritten.
    async fn update_job(&self, job: EvalJob) -> Result<()>;

    async fn get_job(&self, id: &str) -> Result<Option<EvalJob>>;

    /// Newest first
    async fn list_jobs(
        &self,
        project_id: &str,
        status: Option<JobStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<EvalJob>>;
}

#[async_trait]
pub trait EvaluatorStore: Send + Sync {
    /// Active evaluators among `ids`, in request order; unknown ids are skipped
    async fn get_active_evaluators(&self, ids: &[String]) -> Result<Vec<EvaluatorTemplate>>;

    /// Active evaluators visible to a project, presets included
    async fn list_evaluators(&self, project_id: &str) -> Result<Vec<EvaluatorTemplate>>;

    async fn upsert_evaluator(&self, evaluator: EvaluatorTemplate) -> Result<()>;
}

#[async_trait]
pub trait LlmConfigStore: Send + Sync {
    async fn get_llm_config(&self, id: &str) -> Result<Option<LlmConfig>>;

    async fn put_llm_config(&self, config: LlmConfig) -> Result<()>;
}

#[async_trait]
pub trait DatasetStore: Send + Sync {
    async fn dataset_items(&self, dataset_id: &str) -> Result<Vec<DatasetItem>>;

    async fn put_dataset_item(&self, item: DatasetItem) -> Result<()>;
}
