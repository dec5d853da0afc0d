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
    extract::{Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use tracejudge_core::EvaluatorTemplate;

use crate::api::{ApiError, AppState};
use crate::auth::AuthContext;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatorQuery {
    pub project_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EvaluatorList {
    pub evaluators: Vec<EvaluatorTemplate>,
}

/// GET /api/v1/evaluators
///
/// Active templates visible to the project: presets first, then by name.
pub async fn list_evaluators(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<EvaluatorQuery>,
) -> Result<Json<EvaluatorList>, ApiError> {
    let requested = query.project_id.as_deref();
    let project_id = auth.resolve_project(requested).ok_or_else(|| {
        ApiError::Forbidden(format!(
            "No access to project {}",
            requested.unwrap_or_default()
        ))
    })?;
    let evaluators = state.evaluators.list_evaluators(&project_id).await?;
    Ok(Json(EvaluatorList { evaluators }))
}
