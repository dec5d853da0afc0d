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

//! Score aggregation for dashboards: per-evaluator averages and scores
//! grouped by trace.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use tracejudge_core::Score;

/// Scores at or above this count as a pass
pub const PASS_THRESHOLD: f64 = 6.0;

/// Look-back window of a project summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeRange {
    Day,
    #[default]
    Week,
    Month,
    Quarter,
}

impl TimeRange {
    pub fn days(&self) -> i64 {
        match self {
            TimeRange::Day => 1,
            TimeRange::Week => 7,
            TimeRange::Month => 30,
            TimeRange::Quarter => 90,
        }
    }

    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(self.days())
    }
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1d" => Ok(TimeRange::Day),
            "7d" => Ok(TimeRange::Week),
            "30d" => Ok(TimeRange::Month),
            "90d" => Ok(TimeRange::Quarter),
            other => Err(format!("unknown time range: {} (expected 1d, 7d, 30d or 90d)", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatorSummary {
    pub evaluator_id: String,
    pub name: String,
    pub avg_score: f64,
    pub count: usize,
    /// Share of scores at or above [`PASS_THRESHOLD`], in `[0, 1]`
    pub pass_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSummary {
    pub evaluators: Vec<EvaluatorSummary>,
    pub total_count: usize,
    pub total_traces: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceScores {
    pub trace_id: String,
    pub avg_score: f64,
    pub scores: Vec<Score>,
}

#[derive(Default)]
struct Tally {
    name: String,
    sum: f64,
    count: usize,
    passed: usize,
}

/// Per-evaluator statistics, ordered by evaluator name
pub fn summarize(scores: &[Score]) -> ScoreSummary {
    let mut tallies: BTreeMap<(&str, &str), Tally> = BTreeMap::new();
    let mut traces = BTreeSet::new();
    for score in scores {
        let tally = tallies
            .entry((score.evaluator_name.as_str(), score.evaluator_id.as_str()))
            .or_default();
        tally.name = score.evaluator_name.clone();
        tally.sum += score.score;
        tally.count += 1;
        if score.score >= PASS_THRESHOLD {
            tally.passed += 1;
        }
        traces.insert(score.trace_id.as_str());
    }

    let evaluators = tallies
        .into_iter()
        .map(|((_, evaluator_id), tally)| EvaluatorSummary {
            evaluator_id: evaluator_id.to_string(),
            avg_score: tally.sum / tally.count as f64,
            pass_rate: tally.passed as f64 / tally.count as f64,
            count: tally.count,
            name: tally.name,
        })
        .collect();

    ScoreSummary {
        evaluators,
        total_count: scores.len(),
        total_traces: traces.len(),
    }
}

/// Scores bucketed by trace id, each bucket ordered by evaluator name
pub fn group_by_trace(scores: Vec<Score>) -> Vec<TraceScores> {
    let mut buckets: BTreeMap<String, Vec<Score>> = BTreeMap::new();
    for score in scores {
        buckets.entry(score.trace_id.clone()).or_default().push(score);
    }
    buckets
        .into_iter()
        .map(|(trace_id, mut scores)| {
            scores.sort_by(|a, b| a.evaluator_name.cmp(&b.evaluator_name));
            let avg_score = scores.iter().map(|s| s.score).sum::<f64>() / scores.len() as f64;
            TraceScores {
                trace_id,
                avg_score,
                scores,
            }
        })
        .collect()
}
