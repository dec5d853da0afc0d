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

//! Score summaries for dashboards.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use tracejudge_evals::{ScoreSummary, TimeRange, TraceScores};

use crate::api::jobs::visible_job;
use crate::api::{ApiError, AppState};
use crate::auth::AuthContext;

/// GET /api/v1/eval-jobs/:id/summary
pub async fn get_job_summary(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<ScoreSummary>, ApiError> {
    visible_job(&state, &auth, &id).await?;
    Ok(Json(state.jobs.job_summary(&id).await?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResultsResponse {
    pub job_id: String,
    pub traces: Vec<TraceScores>,
}

/// GET /api/v1/eval-jobs/:id/results
pub async fn get_job_results(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<JobResultsResponse>, ApiError> {
    visible_job(&state, &auth, &id).await?;
    let traces = state.jobs.job_results(&id).await?;
    Ok(Json(JobResultsResponse { job_id: id, traces }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryQuery {
    pub project_id: Option<String>,
    /// `1d`, `7d` (default), `30d` or `90d`
    pub time_range: Option<String>,
}

/// GET /api/v1/results/summary
pub async fn get_results_summary(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<ScoreSummary>, ApiError> {
    let requested = query.project_id.as_deref();
    let project_id = auth.resolve_project(requested).ok_or_else(|| {
        ApiError::Forbidden(format!("No access to project {}", requested.unwrap_or_default()))
    })?;
    let range = match query.time_range.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => raw.parse::<TimeRange>().map_err(ApiError::BadRequest)?,
        None => TimeRange::default(),
    };
    Ok(Json(state.jobs.project_summary(&project_id, range).await?))
}
