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

//! Evaluation job service: validation, source resolution, execution.

use crate::executor::{EvalExecutor, EvalTask, ProgressSink};
use crate::results::{group_by_trace, summarize, ScoreSummary, TimeRange, TraceScores};
use crate::tracker::JobTracker;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracejudge_core::{
    DatasetStore, EvalJob, EvaluatorStore, JobSource, JobStatus, JobStore, LlmConfigStore, Score,
    ScoreStore, SourceType, StoreError, TraceStore,
};
use tracing::{error, info};

pub const DEFAULT_LIST_LIMIT: usize = 20;
pub const MAX_LIST_LIMIT: usize = 100;

/// Reasons a job is rejected or cannot be read
#[derive(Debug, Error)]
pub enum JobError {
    #[error("No active evaluators found")]
    NoEvaluators,

    #[error("LLM configuration not found: {0}")]
    LlmConfigNotFound(String),

    #[error("No trace data found to evaluate")]
    NoTraceData,

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub source_type: SourceType,
    #[serde(default)]
    pub trace_ids: Vec<String>,
    #[serde(default)]
    pub dataset_id: Option<String>,
    pub evaluator_ids: Vec<String>,
    pub llm_config_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: String,
    pub total_count: u64,
    pub completed_count: u64,
    pub failed_count: u64,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<&EvalJob> for JobSummary {
    fn from(job: &EvalJob) -> Self {
        Self {
            id: job.id.clone(),
            total_count: job.total_count,
            completed_count: job.completed_count,
            failed_count: job.failed_count,
            status: job.status,
            error_message: job.error_message.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobListItem {
    #[serde(flatten)]
    pub job: EvalJob,
    /// Rounded percentage of tasks completed successfully
    pub progress: u32,
}

impl From<EvalJob> for JobListItem {
    fn from(job: EvalJob) -> Self {
        let progress = job.progress();
        Self { job, progress }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobPage {
    pub jobs: Vec<JobListItem>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

/// Trace input/output pair fed to evaluators
#[derive(Debug, Clone)]
struct TraceSource {
    id: String,
    input: String,
    output: String,
}

pub struct JobService {
    traces: Arc<dyn TraceStore>,
    evaluators: Arc<dyn EvaluatorStore>,
    llm_configs: Arc<dyn LlmConfigStore>,
    datasets: Arc<dyn DatasetStore>,
    jobs: Arc<dyn JobStore>,
    scores: Arc<dyn ScoreStore>,
    executor: Arc<EvalExecutor>,
}

impl JobService {
    pub fn new(
        traces: Arc<dyn TraceStore>,
        evaluators: Arc<dyn EvaluatorStore>,
        llm_configs: Arc<dyn LlmConfigStore>,
        datasets: Arc<dyn DatasetStore>,
        jobs: Arc<dyn JobStore>,
        scores: Arc<dyn ScoreStore>,
        executor: Arc<EvalExecutor>,
    ) -> Self {
        Self {
            traces,
            evaluators,
            llm_configs,
            datasets,
            jobs,
            scores,
            executor,
        }
    }

    /// Validate, create and run a job to completion.
    ///
    /// Rejections happen before anything is written: no evaluators visible
    /// to the project, an LLM config the project cannot use, or no traces to
    /// evaluate.
    #[tracing::instrument(skip(self, request), fields(project_id = %request.project_id))]
    pub async fn create_job(&self, request: CreateJobRequest) -> Result<JobSummary, JobError> {
        let evaluators: Vec<_> = self
            .evaluators
            .get_active_evaluators(&request.evaluator_ids)
            .await?
            .into_iter()
            .filter(|e| e.visible_to(&request.project_id))
            .collect();
        if evaluators.is_empty() {
            return Err(JobError::NoEvaluators);
        }

        // Another project's backend is reported exactly like a missing one
        let usable = self
            .llm_configs
            .get_llm_config(&request.llm_config_id)
            .await?
            .is_some_and(|config| config.usable_by(&request.project_id));
        if !usable {
            return Err(JobError::LlmConfigNotFound(request.llm_config_id));
        }

        let sources = self.resolve_sources(&request).await?;
        if sources.is_empty() {
            return Err(JobError::NoTraceData);
        }

        let job = EvalJob {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: request.project_id.clone(),
            name: request
                .name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| format!("评测任务 {}", Utc::now().format("%Y-%m-%d %H:%M:%S"))),
            source: JobSource {
                source_type: request.source_type,
                trace_ids: request.trace_ids.clone(),
                dataset_id: request.dataset_id.clone(),
            },
            evaluator_ids: evaluators.iter().map(|e| e.id.clone()).collect(),
            llm_config_id: request.llm_config_id.clone(),
            status: JobStatus::Pending,
            total_count: (sources.len() * evaluators.len()) as u64,
            completed_count: 0,
            failed_count: 0,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        let job_id = job.id.clone();

        let mut tasks = Vec::with_capacity(sources.len() * evaluators.len());
        for source in &sources {
            for evaluator in &evaluators {
                tasks.push(EvalTask {
                    trace_id: source.id.clone(),
                    trace_input: source.input.clone(),
                    trace_output: source.output.clone(),
                    evaluator_id: evaluator.id.clone(),
                    evaluator_name: evaluator.name.clone(),
                    prompt_template: evaluator.prompt_template.clone(),
                    project_id: request.project_id.clone(),
                    job_id: job_id.clone(),
                });
            }
        }

        let tracker = Arc::new(JobTracker::start(self.jobs.clone(), job).await?);
        info!(job_id = %job_id, tasks = tasks.len(), "Running evaluation job");

        // The supervisor owns the terminal write, so the job still finishes
        // when the caller stops waiting.
        let supervisor = {
            let executor = self.executor.clone();
            let llm_config_id = request.llm_config_id.clone();
            let job_id = job_id.clone();
            tokio::spawn(async move {
                let batch = {
                    let tracker = tracker.clone();
                    tokio::spawn(async move {
                        let sink: &dyn ProgressSink = tracker.as_ref();
                        executor.execute_batch(tasks, &llm_config_id, Some(sink)).await
                    })
                };
                match batch.await {
                    Ok(_) => tracker.finish().await,
                    Err(e) => {
                        error!(job_id = %job_id, "Evaluation batch aborted: {}", e);
                        tracker.fail(format!("Evaluation batch aborted: {}", e)).await
                    }
                }
            })
        };

        let job = supervisor
            .await
            .map_err(|e| StoreError::Backend(format!("Job supervisor for {} aborted: {}", job_id, e)))??;
        Ok(JobSummary::from(&job))
    }

    async fn resolve_sources(&self, request: &CreateJobRequest) -> Result<Vec<TraceSource>, JobError> {
        let trace_ids: &[String] = match request.source_type {
            SourceType::Trace if request.trace_ids.len() == 1 => &request.trace_ids,
            SourceType::Traces => &request.trace_ids,
            SourceType::Dataset => {
                let Some(dataset_id) = &request.dataset_id else {
                    return Ok(Vec::new());
                };
                let items = self.datasets.dataset_items(dataset_id).await?;
                return Ok(items
                    .iter()
                    .map(|item| TraceSource {
                        id: item.effective_trace_id().to_string(),
                        input: item.input_text(),
                        output: item.output_text(),
                    })
                    .collect());
            }
            SourceType::Trace => return Ok(Vec::new()),
        };

        let mut sources = Vec::with_capacity(trace_ids.len());
        for trace_id in trace_ids {
            match self.traces.get_trace(trace_id).await? {
                Some(trace) if trace.project_id == request.project_id => sources.push(TraceSource {
                    id: trace.id,
                    input: trace.input.unwrap_or_default(),
                    output: trace.output.unwrap_or_default(),
                }),
                _ => {}
            }
        }
        Ok(sources)
    }

    pub async fn list_jobs(
        &self,
        project_id: &str,
        status: Option<JobStatus>,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<JobPage, JobError> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        let total = self
            .jobs
            .list_jobs(project_id, status, usize::MAX, 0)
            .await?
            .len();
        let jobs = self
            .jobs
            .list_jobs(project_id, status, limit, offset)
            .await?
            .into_iter()
            .map(JobListItem::from)
            .collect();
        Ok(JobPage {
            jobs,
            total,
            limit,
            offset,
        })
    }

    pub async fn get_job(&self, id: &str) -> Result<JobListItem, JobError> {
        self.jobs
            .get_job(id)
            .await?
            .map(JobListItem::from)
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    pub async fn job_scores(&self, id: &str) -> Result<Vec<Score>, JobError> {
        self.get_job(id).await?;
        Ok(self.scores.scores_by_job(id).await?)
    }

    /// Per-evaluator averages and pass rates over one job's scores
    pub async fn job_summary(&self, id: &str) -> Result<ScoreSummary, JobError> {
        Ok(summarize(&self.job_scores(id).await?))
    }

    /// One job's scores grouped by trace
    pub async fn job_results(&self, id: &str) -> Result<Vec<TraceScores>, JobError> {
        Ok(group_by_trace(self.job_scores(id).await?))
    }

    /// Per-evaluator statistics over every score the project recorded inside
    /// the window, manual scores included.
    pub async fn project_summary(
        &self,
        project_id: &str,
        range: TimeRange,
    ) -> Result<ScoreSummary, JobError> {
        let cutoff = range.cutoff(Utc::now());
        let scores: Vec<Score> = self
            .scores
            .list_scores(project_id, usize::MAX, 0)
            .await?
            .into_iter()
            .filter(|s| s.created_at >= cutoff)
            .collect();
        Ok(summarize(&scores))
    }
}
