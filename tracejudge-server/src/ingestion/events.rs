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

//! Langfuse ingestion event shapes and their conversion to observations.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracejudge_core::{Observation, ObservationKind, ObservationStatus, TokenBreakdown};

/// One entry of an ingestion batch
#[derive(Debug, Clone, Deserialize)]
pub struct IngestionEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub body: EventBody,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBody {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub input: Option<Value>,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub status_message: Option<String>,
    #[serde(default)]
    pub parent_observation_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Token usage in either the `*Tokens` or the short `input/output/total` naming
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: Option<u64>,
    #[serde(default)]
    pub completion_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
    #[serde(default)]
    pub input: Option<u64>,
    #[serde(default)]
    pub output: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
}

/// How an event participates in trace assembly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventRole {
    Trace,
    Observation,
    Ignored,
}

impl IngestionEvent {
    pub fn role(&self) -> EventRole {
        match self.event_type.as_str() {
            "trace-create" | "trace-update" => EventRole::Trace,
            t if t.contains("generation") || t.contains("span") => EventRole::Observation,
            _ => EventRole::Ignored,
        }
    }

    /// Observation events that do not name their trace
    pub fn is_orphan(&self) -> bool {
        self.role() != EventRole::Trace && non_empty(&self.body.trace_id).is_none()
    }

    /// Trace this event belongs to; orphans fall back to their own id
    pub fn trace_id(&self) -> &str {
        match self.role() {
            EventRole::Trace => &self.id,
            _ => non_empty(&self.body.trace_id).unwrap_or(&self.id),
        }
    }

    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp.as_deref().and_then(parse_time)
    }

    pub fn to_observation(&self) -> Observation {
        let body = &self.body;
        let kind = match self.event_type.as_str() {
            "generation-create" | "generation-update" if body.model.is_some() => {
                ObservationKind::Llm
            }
            "generation-create" | "generation-update" => ObservationKind::Generation,
            _ => ObservationKind::Span,
        };
        let start_time = body.start_time.as_deref().and_then(parse_time);
        let end_time = body.end_time.as_deref().and_then(parse_time);
        let status = if body.level.as_deref() == Some("ERROR") {
            ObservationStatus::Error
        } else {
            ObservationStatus::Success
        };

        Observation {
            id: self.id.clone(),
            kind,
            name: non_empty(&body.name)
                .or_else(|| non_empty(&body.model))
                .unwrap_or(&self.event_type)
                .to_string(),
            model: body.model.clone(),
            start_time,
            end_time,
            latency_ms: Observation::latency_between(start_time, end_time),
            tokens: body.usage.as_ref().and_then(extract_tokens),
            input: body.input.clone(),
            output: body.output.clone(),
            status,
        }
    }
}

/// Normalize usage; a zero total means no usage was reported
pub fn extract_tokens(usage: &Usage) -> Option<TokenBreakdown> {
    let first = |a: Option<u64>, b: Option<u64>| {
        a.filter(|n| *n > 0).or(b.filter(|n| *n > 0)).unwrap_or(0)
    };
    let prompt = first(usage.prompt_tokens, usage.input);
    let completion = first(usage.completion_tokens, usage.output);
    let total = match first(usage.total_tokens, usage.total) {
        0 => prompt.saturating_add(completion),
        n => n,
    };
    (total > 0).then_some(TokenBreakdown {
        prompt,
        completion,
        total,
    })
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(value: Value) -> IngestionEvent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_trace_identity() {
        let trace = event(json!({"id": "t1", "type": "trace-create", "body": {"traceId": "other"}}));
        assert_eq!(trace.trace_id(), "t1");
        assert!(!trace.is_orphan());

        let span = event(json!({"id": "s1", "type": "span-create", "body": {"traceId": "t1"}}));
        assert_eq!(span.trace_id(), "t1");

        let orphan = event(json!({"id": "g1", "type": "generation-create", "body": {}}));
        assert_eq!(orphan.trace_id(), "g1");
        assert!(orphan.is_orphan());
    }

    #[test]
    fn test_roles() {
        let role = |t: &str| event(json!({"id": "x", "type": t})).role();
        assert_eq!(role("trace-update"), EventRole::Trace);
        assert_eq!(role("generation-update"), EventRole::Observation);
        assert_eq!(role("span-create"), EventRole::Observation);
        assert_eq!(role("event-create"), EventRole::Ignored);
        assert_eq!(role("score-create"), EventRole::Ignored);
    }

    #[test]
    fn test_generation_conversion() {
        let obs = event(json!({
            "id": "g1",
            "type": "generation-create",
            "body": {
                "traceId": "t1",
                "model": "gpt-4o",
                "startTime": "2025-01-01T00:00:00.000Z",
                "endTime": "2025-01-01T00:00:01.500Z",
                "usage": {"input": 10, "output": 5},
                "level": "ERROR",
                "input": "hello"
            }
        }))
        .to_observation();

        assert_eq!(obs.kind, ObservationKind::Llm);
        assert_eq!(obs.name, "gpt-4o");
        assert_eq!(obs.latency_ms, Some(1500));
        assert_eq!(
            obs.tokens,
            Some(TokenBreakdown {
                prompt: 10,
                completion: 5,
                total: 15
            })
        );
        assert_eq!(obs.status, ObservationStatus::Error);
        assert_eq!(obs.input, Some(json!("hello")));
    }

    #[test]
    fn test_fallback_name_and_kind() {
        let obs = event(json!({"id": "g1", "type": "generation-create", "body": {}})).to_observation();
        assert_eq!(obs.kind, ObservationKind::Generation);
        assert_eq!(obs.name, "generation-create");
        assert_eq!(obs.latency_ms, None);
        assert_eq!(obs.tokens, None);

        let span = event(json!({"id": "s1", "type": "span-update", "body": {"name": "retrieve", "startTime": "bad"}}))
            .to_observation();
        assert_eq!(span.kind, ObservationKind::Span);
        assert_eq!(span.name, "retrieve");
        assert_eq!(span.start_time, None);
    }

    #[test]
    fn test_token_extraction() {
        let usage = |v: Value| serde_json::from_value::<Usage>(v).unwrap();

        let t = extract_tokens(&usage(json!({"promptTokens": 3, "completionTokens": 4, "totalTokens": 9}))).unwrap();
        assert_eq!((t.prompt, t.completion, t.total), (3, 4, 9));

        let t = extract_tokens(&usage(json!({"input": 2, "output": 2, "total": 0}))).unwrap();
        assert_eq!(t.total, 4);

        let t = extract_tokens(&usage(json!({"promptTokens": 0, "input": 6}))).unwrap();
        assert_eq!(t.prompt, 6);

        assert_eq!(extract_tokens(&usage(json!({}))), None);
        assert_eq!(extract_tokens(&usage(json!({"totalTokens": 0}))), None);
    }
}
