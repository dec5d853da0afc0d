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

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::Value;
use tracejudge_core::{ParseTier, Score};

use crate::api::{parse_json, ApiError, AppState, DataResponse, PageParams, PageResponse};
use crate::auth::AuthContext;

/// Evaluator id recorded on scores submitted through the API
pub const MANUAL_EVALUATOR_ID: &str = "api";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreQuery {
    pub limit: Option<usize>,
    pub page: Option<usize>,
    pub trace_id: Option<String>,
}

/// GET /api/public/scores
pub async fn list_scores(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ScoreQuery>,
) -> Result<Json<PageResponse<Score>>, ApiError> {
    let params = &PageParams {
        limit: query.limit,
        page: query.page,
    };
    let scores = match query.trace_id.as_deref().filter(|t| !t.is_empty()) {
        Some(trace_id) => state
            .scores
            .scores_by_trace(trace_id)
            .await?
            .into_iter()
            .filter(|s| s.project_id == auth.project_id)
            .skip(params.offset())
            .take(params.limit())
            .collect(),
        None => {
            state
                .scores
                .list_scores(&auth.project_id, params.limit(), params.offset())
                .await?
        }
    };
    Ok(Json(PageResponse::new(scores, params)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateScoreRequest {
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub comment: Option<String>,
}

fn score_value(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// POST /api/public/scores
#[tracing::instrument(skip(state, auth, body), fields(project_id = %auth.project_id))]
pub async fn create_score(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    body: Bytes,
) -> Result<(StatusCode, Json<DataResponse<Score>>), ApiError> {
    let request: CreateScoreRequest = parse_json(&body)?;
    let required = || ApiError::BadRequest("traceId, name and value are required".to_string());

    let trace_id = request.trace_id.filter(|t| !t.is_empty()).ok_or_else(required)?;
    let name = request.name.filter(|n| !n.is_empty()).ok_or_else(required)?;
    let raw_value = request.value.filter(|v| !v.is_null()).ok_or_else(required)?;
    let value = score_value(&raw_value)
        .ok_or_else(|| ApiError::BadRequest("value must be a number".to_string()))?;

    match state.traces.get_trace(&trace_id).await? {
        Some(trace) if trace.project_id == auth.project_id => {}
        _ => return Err(ApiError::NotFound("Trace not found".to_string())),
    }

    let score = Score::new(
        trace_id,
        auth.project_id.clone(),
        MANUAL_EVALUATOR_ID,
        name,
        value,
        request.comment.unwrap_or_default(),
        ParseTier::Manual,
    );
    state.scores.append_score(score.clone()).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: score })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_score_value() {
        assert_eq!(score_value(&json!(7)), Some(7.0));
        assert_eq!(score_value(&json!("0.5")), Some(0.5));
        assert_eq!(score_value(&json!("high")), None);
        assert_eq!(score_value(&json!(true)), None);
    }
}
