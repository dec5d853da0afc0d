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

use axum::{body::Bytes, extract::State, Extension, Json};
use serde_json::Value;
use tracing::info;

use crate::api::{ApiError, AppState};
use crate::auth::AuthContext;
use crate::ingestion::IngestionResponse;

/// POST /api/public/ingestion
///
/// Accepts `{batch: [...]}` and acknowledges every event individually.
#[tracing::instrument(skip(state, auth, body), fields(project_id = %auth.project_id))]
pub async fn ingest_batch(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    body: Bytes,
) -> Result<Json<IngestionResponse>, ApiError> {
    let mut payload: Value = serde_json::from_slice(&body)
        .map_err(|_| ApiError::BadRequest("Invalid batch format".to_string()))?;
    let batch = match payload.get_mut("batch").map(Value::take) {
        Some(Value::Array(events)) => events,
        _ => return Err(ApiError::BadRequest("Invalid batch format".to_string())),
    };

    if batch.len() > state.max_batch_size {
        return Err(ApiError::BadRequest(format!(
            "Batch of {} events exceeds the limit of {}",
            batch.len(),
            state.max_batch_size
        )));
    }

    let response = state.aggregator.ingest_raw(&auth.project_id, batch).await;
    info!(
        accepted = response.successes.len(),
        rejected = response.errors.len(),
        "Ingestion batch processed"
    );
    Ok(Json(response))
}
