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

//! Evaluation job endpoints.
//!
//! Job creation runs the whole batch before responding; the returned summary
//! already carries the terminal status and counters.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracejudge_core::{JobStatus, Score};
use tracejudge_evals::{CreateJobRequest, JobListItem, JobPage, JobSummary};
use tracing::info;

use crate::api::{parse_json, ApiError, AppState};
use crate::auth::AuthContext;

fn forbidden(project: &str) -> ApiError {
    ApiError::Forbidden(format!("No access to project {}", project))
}

/// POST /api/v1/eval-jobs
#[tracing::instrument(skip(state, auth, body), fields(project_id = %auth.project_id))]
pub async fn create_job(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    body: Bytes,
) -> Result<(StatusCode, Json<JobSummary>), ApiError> {
    let mut request: CreateJobRequest = parse_json(&body)?;
    request.project_id = auth
        .resolve_project(Some(&request.project_id))
        .ok_or_else(|| forbidden(&request.project_id))?;

    let summary = state.jobs.create_job(request).await?;
    info!(
        job_id = %summary.id,
        status = %summary.status,
        completed = summary.completed_count,
        failed = summary.failed_count,
        "Evaluation job finished"
    );
    Ok((StatusCode::CREATED, Json(summary)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobQuery {
    pub project_id: Option<String>,
    pub status: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// GET /api/v1/eval-jobs
pub async fn list_jobs(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<JobQuery>,
) -> Result<Json<JobPage>, ApiError> {
    let requested = query.project_id.as_deref();
    let project_id = auth
        .resolve_project(requested)
        .ok_or_else(|| forbidden(requested.unwrap_or_default()))?;
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(JobStatus::from_str)
        .transpose()
        .map_err(ApiError::BadRequest)?;

    let page = state
        .jobs
        .list_jobs(&project_id, status, query.limit, query.offset.unwrap_or(0))
        .await?;
    Ok(Json(page))
}

pub(crate) async fn visible_job(state: &AppState, auth: &AuthContext, id: &str) -> Result<JobListItem, ApiError> {
    let item = state.jobs.get_job(id).await?;
    if !auth.can_access(&item.job.project_id) {
        return Err(ApiError::NotFound(format!("Job {}", id)));
    }
    Ok(item)
}

/// GET /api/v1/eval-jobs/:id
pub async fn get_job(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<JobListItem>, ApiError> {
    Ok(Json(visible_job(&state, &auth, &id).await?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobScoresResponse {
    pub job_id: String,
    pub scores: Vec<Score>,
}

/// GET /api/v1/eval-jobs/:id/scores
pub async fn get_job_scores(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<JobScoresResponse>, ApiError> {
    visible_job(&state, &auth, &id).await?;
    let scores = state.jobs.job_scores(&id).await?;
    Ok(Json(JobScoresResponse { job_id: id, scores }))
}
