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

//! Canonical trace record and its observations.
//!
//! A [`Trace`] is keyed by an externally supplied id that stays stable across
//! repeated deliveries. Observations inside a trace are keyed by their own id;
//! [`Trace::merge_observations`] is the only way new observations enter a
//! stored trace and it never duplicates an id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

pub const TRACE_STATUS_SUCCESS: &str = "success";
pub const TRACE_STATUS_ERROR: &str = "error";

/// Kind of sub-operation recorded inside a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationKind {
    /// A generation with a known model
    Llm,
    /// A generation without model information
    Generation,
    Span,
    Retrieval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationStatus {
    #[default]
    Success,
    Error,
}

/// Token usage of a single observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenBreakdown {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
}

/// One sub-operation inside a trace (LLM call, retrieval step, span)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    /// Unique within the owning trace
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ObservationKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Absent unless both endpoints are known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenBreakdown>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub status: ObservationStatus,
}

impl Observation {
    /// Latency in milliseconds between two instants.
    ///
    /// Returns `None` when either endpoint is missing or the interval is
    /// negative, so that aggregate sums are never skewed by a substitute value.
    pub fn latency_between(
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Option<u64> {
        let (start, end) = (start?, end?);
        u64::try_from((end - start).num_milliseconds()).ok()
    }

    pub fn total_tokens(&self) -> u64 {
        self.tokens.map(|t| t.total).unwrap_or(0)
    }

    /// Input rendered as text, `None` when absent or empty
    pub fn input_text(&self) -> Option<String> {
        self.input.as_ref().and_then(value_to_text)
    }

    /// Output rendered as text, `None` when absent or empty
    pub fn output_text(&self) -> Option<String> {
        self.output.as_ref().and_then(value_to_text)
    }
}

/// Render a free-form payload as text: strings verbatim, everything else as
/// compact JSON. Null and empty strings count as "no value".
pub fn value_to_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) if s.is_empty() => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => serde_json::to_string(other).ok(),
    }
}

/// One captured end-to-end interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    /// Merge key: deliveries with the same id refer to the same trace
    pub id: String,
    pub project_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    pub status: String,
    #[serde(default)]
    pub observations: Vec<Observation>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Source webhook connection, when the trace arrived through one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Trace {
    pub fn new(id: impl Into<String>, project_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            project_id: project_id.into(),
            name: "Trace".to_string(),
            workflow_name: None,
            timestamp: now,
            input: None,
            output: None,
            tags: BTreeSet::new(),
            total_tokens: None,
            latency_ms: None,
            status: TRACE_STATUS_SUCCESS.to_string(),
            observations: Vec::new(),
            metadata: HashMap::new(),
            user_id: None,
            session_id: None,
            connection_id: None,
            updated_at: now,
        }
    }

    /// Append observations whose id is not already present.
    ///
    /// Incoming duplicates of each other are collapsed too: the first
    /// occurrence wins. Returns the number of observations added.
    pub fn merge_observations(&mut self, incoming: impl IntoIterator<Item = Observation>) -> usize {
        let mut seen: HashSet<String> = self.observations.iter().map(|o| o.id.clone()).collect();
        let before = self.observations.len();
        for obs in incoming {
            if seen.insert(obs.id.clone()) {
                self.observations.push(obs);
            }
        }
        self.observations.len() - before
    }

    /// Recompute token and latency totals over the full observation list.
    ///
    /// A zero sum leaves the stored value untouched, so a trace whose totals
    /// came from a direct delivery keeps them when observations carry none.
    pub fn recompute_totals(&mut self) {
        let (tokens, latency) = sum_totals(&self.observations);
        if tokens > 0 {
            self.total_tokens = Some(tokens);
        }
        if latency > 0 {
            self.latency_ms = Some(latency);
        }
    }

    /// Overwrite input only with a non-empty value
    pub fn set_input_if_present(&mut self, input: Option<String>) {
        if let Some(input) = input.filter(|s| !s.is_empty()) {
            self.input = Some(input);
        }
    }

    /// Overwrite output only with a non-empty value
    pub fn set_output_if_present(&mut self, output: Option<String>) {
        if let Some(output) = output.filter(|s| !s.is_empty()) {
            self.output = Some(output);
        }
    }

    pub fn has_error(&self) -> bool {
        self.status == TRACE_STATUS_ERROR
            || self
                .observations
                .iter()
                .any(|o| o.status == ObservationStatus::Error)
    }
}

/// Sum of token totals and latencies over a set of observations
pub fn sum_totals(observations: &[Observation]) -> (u64, u64) {
    observations.iter().fold((0u64, 0u64), |(tokens, latency), obs| {
        (
            tokens.saturating_add(obs.total_tokens()),
            latency.saturating_add(obs.latency_ms.unwrap_or(0)),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn obs(id: &str, tokens: u64, latency: Option<u64>) -> Observation {
        Observation {
            id: id.to_string(),
            kind: ObservationKind::Span,
            name: id.to_string(),
            model: None,
            start_time: None,
            end_time: None,
            latency_ms: latency,
            tokens: (tokens > 0).then_some(TokenBreakdown {
                prompt: 0,
                completion: 0,
                total: tokens,
            }),
            input: None,
            output: None,
            status: ObservationStatus::Success,
        }
    }

    #[test]
    fn test_latency_requires_both_endpoints() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let end = start + chrono::Duration::milliseconds(1500);
        assert_eq!(Observation::latency_between(Some(start), Some(end)), Some(1500));
        assert_eq!(Observation::latency_between(Some(start), None), None);
        assert_eq!(Observation::latency_between(None, Some(end)), None);
        assert_eq!(Observation::latency_between(Some(end), Some(start)), None);
    }

    #[test]
    fn test_merge_skips_existing_ids() {
        let mut trace = Trace::new("t1", "p1");
        assert_eq!(trace.merge_observations(vec![obs("a", 10, Some(5)), obs("b", 20, None)]), 2);
        assert_eq!(trace.merge_observations(vec![obs("a", 99, Some(99)), obs("c", 5, Some(1))]), 1);
        assert_eq!(trace.observations.len(), 3);
        assert_eq!(trace.observations[0].total_tokens(), 10);

        trace.recompute_totals();
        assert_eq!(trace.total_tokens, Some(35));
        assert_eq!(trace.latency_ms, Some(6));
    }

    #[test]
    fn test_merge_collapses_duplicates_within_delivery() {
        let mut trace = Trace::new("t1", "p1");
        assert_eq!(trace.merge_observations(vec![obs("a", 1, None), obs("a", 2, None)]), 1);
        assert_eq!(trace.observations[0].total_tokens(), 1);
    }

    #[test]
    fn test_recompute_keeps_existing_when_sum_is_zero() {
        let mut trace = Trace::new("t1", "p1");
        trace.total_tokens = Some(42);
        trace.latency_ms = Some(7);
        trace.merge_observations(vec![obs("a", 0, None)]);
        trace.recompute_totals();
        assert_eq!(trace.total_tokens, Some(42));
        assert_eq!(trace.latency_ms, Some(7));
    }

    #[test]
    fn test_empty_values_never_overwrite() {
        let mut trace = Trace::new("t1", "p1");
        trace.set_input_if_present(Some("hello".into()));
        trace.set_input_if_present(Some(String::new()));
        trace.set_input_if_present(None);
        assert_eq!(trace.input.as_deref(), Some("hello"));
    }

    #[test]
    fn test_value_to_text() {
        assert_eq!(value_to_text(&serde_json::json!("hi")), Some("hi".into()));
        assert_eq!(value_to_text(&serde_json::json!("")), None);
        assert_eq!(value_to_text(&serde_json::Value::Null), None);
        assert_eq!(
            value_to_text(&serde_json::json!({"q": 1})),
            Some("{\"q\":1}".into())
        );
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn merge_twice_is_idempotent(
                specs in proptest::collection::vec((0u8..20, 0u64..1000, proptest::option::of(0u64..5000)), 0..30)
            ) {
                let batch: Vec<Observation> = specs
                    .iter()
                    .map(|(id, tokens, latency)| obs(&format!("o{}", id), *tokens, *latency))
                    .collect();

                let mut trace = Trace::new("t", "p");
                trace.merge_observations(batch.clone());
                trace.recompute_totals();
                let once = trace.clone();

                prop_assert_eq!(trace.merge_observations(batch), 0);
                trace.recompute_totals();
                prop_assert_eq!(trace.observations.len(), once.observations.len());
                prop_assert_eq!(trace.total_tokens, once.total_tokens);
                prop_assert_eq!(trace.latency_ms, once.latency_ms);
            }
        }
    }
}
