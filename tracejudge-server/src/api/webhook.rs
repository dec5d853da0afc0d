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

//! Dify workflow webhook.
//!
//! Each delivery describes one finished workflow run and becomes one trace.
//! When a secret is configured for the connection the raw body must carry a
//! valid HMAC-SHA256 in `X-Dify-Signature` (hex, optionally `sha256=`).

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use tracejudge_core::trace::value_to_text;
use tracejudge_core::{Trace, TRACE_STATUS_SUCCESS};
use tracing::{info, warn};

use crate::api::{parse_json, ApiError, AppState};

pub const SIGNATURE_HEADER: &str = "X-Dify-Signature";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Default, Deserialize)]
pub struct DifyWebhook {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub workflow_run_id: Option<String>,
    #[serde(default)]
    pub data: DifyRun,
}

#[derive(Debug, Default, Deserialize)]
pub struct DifyRun {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub inputs: Option<Value>,
    #[serde(default)]
    pub outputs: Option<Value>,
    /// Seconds
    #[serde(default)]
    pub elapsed_time: Option<f64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
    /// RFC 3339 string or epoch seconds
    #[serde(default)]
    pub created_at: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub success: bool,
    pub trace_id: String,
}

/// Check `signature` against HMAC-SHA256 of `body`
pub fn verify_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    let Some(signature) = signature else {
        return false;
    };
    let digest = signature.trim();
    let digest = digest.strip_prefix("sha256=").unwrap_or(digest);
    let Ok(expected) = hex::decode(digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Project encoded in a connection id (`<project>-<suffix>`)
pub fn connection_project(connection_id: &str) -> &str {
    connection_id
        .split('-')
        .next()
        .filter(|p| !p.is_empty())
        .unwrap_or("default")
}

fn parse_created_at(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        _ => None,
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

/// Build the trace for one workflow run
pub fn dify_to_trace(connection_id: &str, hook: &DifyWebhook) -> Trace {
    let run = &hook.data;
    let id = non_empty(&run.id)
        .or_else(|| non_empty(&hook.workflow_run_id))
        .map(str::to_string)
        .unwrap_or_else(|| format!("trace-{}", Utc::now().timestamp_millis()));
    let event = non_empty(&hook.event).unwrap_or("unknown");
    let status = non_empty(&run.status);

    let mut trace = Trace::new(id, connection_project(connection_id));
    trace.name = event.to_string();
    trace.connection_id = Some(connection_id.to_string());
    trace.workflow_name = Some(run.workflow_id.clone().unwrap_or_default());
    if let Some(created) = run.created_at.as_ref().and_then(parse_created_at) {
        trace.timestamp = created;
    }
    trace.input = run.inputs.as_ref().and_then(value_to_text);
    trace.output = run.outputs.as_ref().and_then(value_to_text);

    trace.metadata.insert("event".into(), hook.event.clone().unwrap_or_default());
    trace.metadata.insert("status".into(), run.status.clone().unwrap_or_default());
    trace.metadata.insert("workflow_id".into(), run.workflow_id.clone().unwrap_or_default());
    trace.tags.insert(event.to_string());
    trace.tags.insert(status.unwrap_or("unknown").to_string());

    trace.total_tokens = run.total_tokens;
    trace.latency_ms = run
        .elapsed_time
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .map(|secs| (secs * 1000.0).round() as u64);
    trace.status = match status {
        Some("succeeded") => TRACE_STATUS_SUCCESS.to_string(),
        Some(other) => other.to_string(),
        None => "unknown".to_string(),
    };
    trace
}

/// POST /api/v1/traces/webhook/:connection_id
#[tracing::instrument(skip(state, headers, body))]
pub async fn receive_dify_webhook(
    State(state): State<AppState>,
    Path(connection_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    if let Some(secret) = state.webhook_secrets.get(&connection_id) {
        let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
        if !verify_signature(secret, &body, signature) {
            warn!("Rejected webhook with bad signature for {}", connection_id);
            return Err(ApiError::Unauthorized("Signature verification failed".to_string()));
        }
    }

    let hook: DifyWebhook = parse_json(&body)?;
    let mut trace = dify_to_trace(&connection_id, &hook);

    let _guard = state.trace_locks.lock(&trace.id).await;
    if let Some(existing) = state.traces.get_trace(&trace.id).await? {
        if existing.project_id != trace.project_id {
            return Err(ApiError::Conflict(format!(
                "Trace {} belongs to another project",
                trace.id
            )));
        }
        trace.observations = existing.observations;
    }

    let trace_id = trace.id.clone();
    state.traces.put_trace(trace).await?;
    info!("Webhook trace {} stored for connection {}", trace_id, connection_id);

    Ok(Json(WebhookResponse {
        success: true,
        trace_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_signature_forms() {
        let body = br#"{"event":"workflow_finished"}"#;
        let digest = sign("whsec_1", body);

        assert!(verify_signature("whsec_1", body, Some(&digest)));
        assert!(verify_signature("whsec_1", body, Some(&format!("sha256={}", digest))));
        assert!(!verify_signature("whsec_2", body, Some(&digest)));
        assert!(!verify_signature("whsec_1", b"tampered", Some(&digest)));
        assert!(!verify_signature("whsec_1", body, Some("not-hex")));
        assert!(!verify_signature("whsec_1", body, None));
    }

    #[test]
    fn test_dify_conversion() {
        let hook: DifyWebhook = serde_json::from_value(json!({
            "event": "workflow_finished",
            "workflow_run_id": "run-1",
            "data": {
                "id": "exec-9",
                "workflow_id": "wf-2",
                "status": "succeeded",
                "inputs": {"query": "hello"},
                "outputs": {"answer": "hi"},
                "elapsed_time": 1.25,
                "total_tokens": 88,
                "created_at": "2025-02-02T08:00:00Z"
            }
        }))
        .unwrap();

        let trace = dify_to_trace("acme-dify-01", &hook);
        assert_eq!(trace.id, "exec-9");
        assert_eq!(trace.project_id, "acme");
        assert_eq!(trace.name, "workflow_finished");
        assert_eq!(trace.connection_id.as_deref(), Some("acme-dify-01"));
        assert_eq!(trace.workflow_name.as_deref(), Some("wf-2"));
        assert_eq!(trace.input.as_deref(), Some(r#"{"query":"hello"}"#));
        assert_eq!(trace.output.as_deref(), Some(r#"{"answer":"hi"}"#));
        assert_eq!(trace.latency_ms, Some(1250));
        assert_eq!(trace.total_tokens, Some(88));
        assert_eq!(trace.status, TRACE_STATUS_SUCCESS);
        assert!(trace.tags.contains("workflow_finished") && trace.tags.contains("succeeded"));
        assert_eq!(trace.metadata["workflow_id"], "wf-2");
        assert_eq!(trace.timestamp.to_rfc3339(), "2025-02-02T08:00:00+00:00");
    }

    #[test]
    fn test_sparse_payload_defaults() {
        let hook: DifyWebhook =
            serde_json::from_value(json!({"workflow_run_id": "run-7", "data": {"status": "failed", "created_at": 1735689600}}))
                .unwrap();
        let trace = dify_to_trace("-odd", &hook);
        assert_eq!(trace.id, "run-7");
        assert_eq!(trace.project_id, "default");
        assert_eq!(trace.name, "unknown");
        assert_eq!(trace.status, "failed");
        assert_eq!(trace.input, None);
        assert_eq!(trace.latency_ms, None);
        assert_eq!(trace.timestamp.timestamp(), 1735689600);
    }
}
