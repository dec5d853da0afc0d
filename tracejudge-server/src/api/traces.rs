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

//! Trace read endpoints of the public API and direct trace delivery.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracejudge_core::{Trace, TRACE_STATUS_SUCCESS};
use tracing::info;

use crate::api::{parse_json, ApiError, AppState, DataResponse, PageParams, PageResponse};
use crate::auth::AuthContext;

/// GET /api/public/traces
pub async fn list_public_traces(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(params): Query<PageParams>,
) -> Result<Json<PageResponse<Trace>>, ApiError> {
    let traces = state
        .traces
        .list_traces(&auth.project_id, params.limit(), params.offset())
        .await?;
    Ok(Json(PageResponse::new(traces, &params)))
}

/// GET /api/public/traces/:trace_id
pub async fn get_public_trace(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(trace_id): Path<String>,
) -> Result<Json<DataResponse<Trace>>, ApiError> {
    match state.traces.get_trace(&trace_id).await? {
        Some(trace) if auth.can_access(&trace.project_id) => Ok(Json(DataResponse { data: trace })),
        _ => Err(ApiError::NotFound(format!("Trace {}", trace_id))),
    }
}

/// A trace delivered whole, without observations
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracePayload {
    pub id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default, alias = "difyConnectionId")]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub workflow_name: Option<String>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
    #[serde(default)]
    pub latency_ms: Option<u64>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Either one trace or `{traces: [...]}`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TraceDelivery {
    Batch { traces: Vec<TracePayload> },
    Single(Box<TracePayload>),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceDeliveryResponse {
    pub success: bool,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl TracePayload {
    fn into_trace(self, project_id: &str, existing: Option<Trace>) -> Trace {
        let mut trace = Trace::new(self.id, project_id);
        if let Some(existing) = existing {
            // Observations only arrive through ingestion; keep them
            trace.timestamp = existing.timestamp;
            trace.observations = existing.observations;
        }
        if let Some(name) = self.name.filter(|n| !n.is_empty()) {
            trace.name = name;
        }
        if let Some(timestamp) = self.timestamp {
            trace.timestamp = timestamp;
        }
        trace.input = self.input;
        trace.output = self.output;
        trace.metadata = self.metadata;
        trace.tags = self.tags;
        trace.user_id = self.user_id;
        trace.session_id = self.session_id;
        trace.connection_id = self.connection_id;
        trace.workflow_name = self.workflow_name;
        trace.total_tokens = self.total_tokens;
        trace.latency_ms = self.latency_ms;
        trace.status = self
            .status
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| TRACE_STATUS_SUCCESS.to_string());
        trace.recompute_totals();
        trace
    }
}

/// POST /api/v1/traces
#[tracing::instrument(skip(state, auth, body), fields(project_id = %auth.project_id))]
pub async fn upsert_traces(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    body: Bytes,
) -> Result<(StatusCode, Json<TraceDeliveryResponse>), ApiError> {
    let (payloads, single) = match parse_json::<TraceDelivery>(&body)? {
        TraceDelivery::Batch { traces } => (traces, false),
        TraceDelivery::Single(trace) => (vec![*trace], true),
    };

    // Validate the whole delivery before writing any of it
    let mut resolved = Vec::with_capacity(payloads.len());
    for payload in payloads {
        if payload.id.trim().is_empty() {
            return Err(ApiError::BadRequest("Trace id must not be empty".to_string()));
        }
        let project_id = auth
            .resolve_project(payload.project_id.as_deref())
            .ok_or_else(|| ApiError::Forbidden(format!("Project of trace {}", payload.id)))?;
        resolved.push((project_id, payload));
    }

    let count = resolved.len();
    let mut last_id = None;
    for (project_id, payload) in resolved {
        let _guard = state.trace_locks.lock(&payload.id).await;
        let existing = state.traces.get_trace(&payload.id).await?;
        if let Some(existing) = &existing {
            if existing.project_id != project_id {
                return Err(ApiError::Conflict(format!(
                    "Trace {} belongs to another project",
                    payload.id
                )));
            }
        }
        let trace = payload.into_trace(&project_id, existing);
        last_id = Some(trace.id.clone());
        state.traces.put_trace(trace).await?;
    }

    info!("Received {} traces", count);
    Ok((
        StatusCode::CREATED,
        Json(TraceDeliveryResponse {
            success: true,
            count,
            trace_id: if single { last_id } else { None },
        }),
    ))
}
