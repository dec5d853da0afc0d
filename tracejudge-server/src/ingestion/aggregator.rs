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

//! Ingestion aggregator.
//!
//! Folds a batch of Langfuse events into canonical traces: events are
//! grouped by trace id in first-seen order, then each group is either
//! created as a new trace or merged into the stored one. Read-merge-write
//! for one trace id runs under that id's lock, so concurrent deliveries of
//! the same trace serialize.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracejudge_core::trace::value_to_text;
use tracejudge_core::{Observation, StoreError, Trace, TraceStore};
use tracing::{debug, info, warn};

use super::events::{EventBody, EventRole, IngestionEvent};
use super::locks::KeyedLocks;

/// Tag stamped on traces created through this path
pub const INGESTION_TAG: &str = "langfuse";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventAccepted {
    pub id: String,
    pub status: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRejected {
    pub id: String,
    pub status: u16,
    pub message: String,
}

/// Per-event acknowledgement of one batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestionResponse {
    pub successes: Vec<EventAccepted>,
    pub errors: Vec<EventRejected>,
}

#[derive(Debug, Default)]
struct TraceGroup {
    trace_event: Option<IngestionEvent>,
    observations: Vec<IngestionEvent>,
}

pub struct Aggregator {
    traces: Arc<dyn TraceStore>,
    locks: Arc<KeyedLocks>,
    reject_orphans: bool,
}

impl Aggregator {
    /// `locks` must be the same set every other trace writer takes
    pub fn new(traces: Arc<dyn TraceStore>, locks: Arc<KeyedLocks>, reject_orphans: bool) -> Self {
        Self {
            traces,
            locks,
            reject_orphans,
        }
    }

    /// Ingest raw batch entries; entries that are not valid events are
    /// rejected individually.
    pub async fn ingest_raw(&self, project_id: &str, batch: Vec<Value>) -> IngestionResponse {
        let mut rejected = Vec::new();
        let mut events = Vec::with_capacity(batch.len());
        for raw in batch {
            let id = raw
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            match serde_json::from_value::<IngestionEvent>(raw) {
                Ok(event) => events.push(event),
                Err(e) => rejected.push(EventRejected {
                    id,
                    status: 400,
                    message: format!("Invalid event: {}", e),
                }),
            }
        }

        let mut response = self.ingest(project_id, events).await;
        rejected.append(&mut response.errors);
        response.errors = rejected;
        response
    }

    #[tracing::instrument(skip(self, events), fields(events = events.len()))]
    pub async fn ingest(&self, project_id: &str, events: Vec<IngestionEvent>) -> IngestionResponse {
        info!("Received {} events for project {}", events.len(), project_id);

        let mut response = IngestionResponse::default();
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, TraceGroup> = HashMap::new();

        for event in events {
            if event.is_orphan() {
                if self.reject_orphans {
                    warn!(event_id = %event.id, "Rejecting {} without traceId", event.event_type);
                    response.errors.push(EventRejected {
                        id: event.id.clone(),
                        status: 400,
                        message: "Missing body.traceId".to_string(),
                    });
                    continue;
                }
                if event.role() == EventRole::Observation {
                    warn!(event_id = %event.id, "{} without traceId, filing under its own id", event.event_type);
                }
            }

            response.successes.push(EventAccepted {
                id: event.id.clone(),
                status: 201,
            });

            let trace_id = event.trace_id().to_string();
            let group = groups.entry(trace_id.clone()).or_insert_with(|| {
                order.push(trace_id);
                TraceGroup::default()
            });
            match event.role() {
                EventRole::Trace => group.trace_event = Some(event),
                EventRole::Observation => group.observations.push(event),
                EventRole::Ignored => debug!("Ignoring {} event {}", event.event_type, event.id),
            }
        }

        for trace_id in order {
            let Some(group) = groups.remove(&trace_id) else {
                continue;
            };
            if let Err(e) = self.apply_group(project_id, &trace_id, group).await {
                warn!("Error processing trace {}: {}", trace_id, e);
            }
        }

        response
    }

    async fn apply_group(
        &self,
        project_id: &str,
        trace_id: &str,
        group: TraceGroup,
    ) -> Result<(), StoreError> {
        let _guard = self.locks.lock(trace_id).await;

        let trace = match self.traces.get_trace(trace_id).await? {
            Some(mut existing) => {
                if existing.project_id != project_id {
                    return Err(StoreError::Conflict(format!(
                        "trace {} belongs to another project",
                        trace_id
                    )));
                }
                merge_group(&mut existing, group);
                debug!(
                    "Updated trace {} with {} observations",
                    trace_id,
                    existing.observations.len()
                );
                existing
            }
            None => {
                let created = build_trace(project_id, trace_id, group);
                debug!(
                    "Created trace {} with {} observations",
                    trace_id,
                    created.observations.len()
                );
                created
            }
        };

        self.traces.put_trace(trace).await
    }
}

/// Input/output favoring the trace event body, else the first observation
/// input and the last observation output
fn canonical_io(body: Option<&EventBody>, observations: &[Observation]) -> (Option<String>, Option<String>) {
    let input = body
        .and_then(|b| b.input.as_ref())
        .and_then(value_to_text)
        .or_else(|| observations.iter().find_map(Observation::input_text));
    let output = body
        .and_then(|b| b.output.as_ref())
        .and_then(value_to_text)
        .or_else(|| observations.iter().rev().find_map(Observation::output_text));
    (input, output)
}

fn stringify_metadata(body: &EventBody) -> impl Iterator<Item = (String, String)> + '_ {
    body.metadata.iter().flatten().map(|(key, value)| {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        (key.clone(), text)
    })
}

fn build_trace(project_id: &str, trace_id: &str, group: TraceGroup) -> Trace {
    let observations: Vec<Observation> = group.observations.iter().map(IngestionEvent::to_observation).collect();
    let body = group.trace_event.as_ref().map(|e| &e.body);

    let mut trace = Trace::new(trace_id, project_id);
    if let Some(name) = body.and_then(|b| b.name.clone()).filter(|n| !n.is_empty()) {
        trace.name = name;
    }
    trace.timestamp = group
        .trace_event
        .as_ref()
        .and_then(IngestionEvent::parsed_timestamp)
        .or_else(|| group.observations.first().and_then(IngestionEvent::parsed_timestamp))
        .unwrap_or_else(Utc::now);

    let (input, output) = canonical_io(body, &observations);
    trace.input = input;
    trace.output = output;
    trace.tags.insert(INGESTION_TAG.to_string());
    if let Some(body) = body {
        trace.metadata.extend(stringify_metadata(body));
        trace.user_id = body.user_id.clone();
        trace.session_id = body.session_id.clone();
    }

    trace.merge_observations(observations);
    trace.recompute_totals();
    trace
}

fn merge_group(trace: &mut Trace, group: TraceGroup) {
    let observations: Vec<Observation> = group.observations.iter().map(IngestionEvent::to_observation).collect();
    let body = group.trace_event.as_ref().map(|e| &e.body);

    let (input, output) = canonical_io(body, &observations);
    trace.merge_observations(observations);
    trace.recompute_totals();
    trace.set_input_if_present(input);
    trace.set_output_if_present(output);

    if let Some(body) = body {
        for (key, value) in stringify_metadata(body) {
            trace.metadata.entry(key).or_insert(value);
        }
        if let Some(name) = body.name.as_deref().filter(|n| !n.is_empty()) {
            trace.name = name.to_string();
        }
        if body.user_id.is_some() {
            trace.user_id = body.user_id.clone();
        }
        if body.session_id.is_some() {
            trace.session_id = body.session_id.clone();
        }
    }
    trace.updated_at = Utc::now();
}
