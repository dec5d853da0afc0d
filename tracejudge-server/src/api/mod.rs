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

//! HTTP handlers.
//!
//! `/api/public/*` mirrors the Langfuse public API (Basic auth). `/api/v1/*`
//! carries the native trace, webhook and evaluation endpoints (`X-API-Key`).

pub mod datasets;
pub mod evaluators;
pub mod health;
pub mod ingestion;
pub mod jobs;
pub mod results;
pub mod scores;
pub mod traces;
pub mod webhook;

use axum::{
    body::Bytes,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracejudge_core::{DatasetStore, EvaluatorStore, ScoreStore, StoreError, TraceStore};
use tracejudge_evals::{JobError, JobService};

use crate::ingestion::{Aggregator, KeyedLocks};

pub use datasets::{list_dataset_items, put_dataset_items};
pub use evaluators::list_evaluators;
pub use health::health_check;
pub use ingestion::ingest_batch;
pub use jobs::{create_job, get_job, get_job_scores, list_jobs};
pub use results::{get_job_results, get_job_summary, get_results_summary};
pub use scores::{create_score, list_scores};
pub use traces::{get_public_trace, list_public_traces, upsert_traces};
pub use webhook::receive_dify_webhook;

pub const DEFAULT_PAGE_LIMIT: usize = 20;
pub const MAX_PAGE_LIMIT: usize = 100;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub traces: Arc<dyn TraceStore>,
    pub scores: Arc<dyn ScoreStore>,
    pub evaluators: Arc<dyn EvaluatorStore>,
    pub datasets: Arc<dyn DatasetStore>,
    pub aggregator: Arc<Aggregator>,
    /// Per-trace locks held by every read-merge-write of a stored trace
    pub trace_locks: Arc<KeyedLocks>,
    pub jobs: Arc<JobService>,
    pub max_batch_size: usize,
    /// Webhook signing secrets by connection id
    pub webhook_secrets: Arc<HashMap<String, String>>,
    pub started_at: Instant,
}

/// API error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => ApiError::NotFound(msg),
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NoEvaluators | JobError::LlmConfigNotFound(_) | JobError::NoTraceData => {
                ApiError::BadRequest(err.to_string())
            }
            JobError::NotFound(id) => ApiError::NotFound(format!("Job {}", id)),
            JobError::Store(e) => e.into(),
        }
    }
}

/// Decode a JSON body, reporting failures as `{error}` 400s
pub(crate) fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))
}

/// `limit`/`page` pagination used by the public API
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageParams {
    pub limit: Option<usize>,
    pub page: Option<usize>,
}

impl PageParams {
    pub fn limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT)
    }

    pub fn page(&self) -> usize {
        self.page.unwrap_or(1).max(1)
    }

    pub fn offset(&self) -> usize {
        (self.page() - 1).saturating_mul(self.limit())
    }
}

/// `{data, meta}` envelope of the public list endpoints
#[derive(Debug, Serialize)]
pub struct PageResponse<T> {
    pub data: Vec<T>,
    pub meta: PageMeta,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub page: usize,
    pub limit: usize,
}

impl<T> PageResponse<T> {
    pub fn new(data: Vec<T>, params: &PageParams) -> Self {
        Self {
            data,
            meta: PageMeta {
                page: params.page(),
                limit: params.limit(),
            },
        }
    }
}

/// `{data}` envelope of the public single-record endpoints
#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub data: T,
}
