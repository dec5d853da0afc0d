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

//! Dataset items used as evaluation job sources.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracejudge_core::DatasetItem;

use crate::api::{parse_json, ApiError, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDatasetItem {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub output: Value,
}

#[derive(Debug, Deserialize)]
pub struct DatasetItemsRequest {
    pub items: Vec<NewDatasetItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetItemsResponse {
    pub dataset_id: String,
    pub items: Vec<DatasetItem>,
}

/// POST /api/v1/datasets/:dataset_id/items
pub async fn put_dataset_items(
    State(state): State<AppState>,
    Path(dataset_id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<DatasetItemsResponse>), ApiError> {
    let request: DatasetItemsRequest = parse_json(&body)?;
    if request.items.is_empty() {
        return Err(ApiError::BadRequest("items must not be empty".to_string()));
    }

    let mut items = Vec::with_capacity(request.items.len());
    for new in request.items {
        let item = DatasetItem {
            id: new
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            dataset_id: dataset_id.clone(),
            trace_id: new.trace_id.filter(|t| !t.is_empty()),
            input: new.input,
            output: new.output,
        };
        state.datasets.put_dataset_item(item.clone()).await?;
        items.push(item);
    }

    Ok((
        StatusCode::CREATED,
        Json(DatasetItemsResponse { dataset_id, items }),
    ))
}

/// GET /api/v1/datasets/:dataset_id/items
pub async fn list_dataset_items(
    State(state): State<AppState>,
    Path(dataset_id): Path<String>,
) -> Result<Json<DatasetItemsResponse>, ApiError> {
    let items = state.datasets.dataset_items(&dataset_id).await?;
    Ok(Json(DatasetItemsResponse { dataset_id, items }))
}
