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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How confidently a score was extracted from model output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseTier {
    /// Structured JSON object found and read
    Exact,
    /// Score recovered by pattern matching
    Approximate,
    /// Nothing usable found, midpoint substituted
    Defaulted,
    /// Posted by a caller rather than produced by an evaluator
    Manual,
}

/// One evaluator's judgement for one trace. Write-once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Score {
    pub id: String,
    pub trace_id: String,
    pub project_id: String,
    pub evaluator_id: String,
    pub evaluator_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub score: f64,
    pub reasoning: String,
    pub parse_tier: ParseTier,
    pub created_at: DateTime<Utc>,
}

impl Score {
    /// New score row with a fresh id
    pub fn new(
        trace_id: impl Into<String>,
        project_id: impl Into<String>,
        evaluator_id: impl Into<String>,
        evaluator_name: impl Into<String>,
        score: f64,
        reasoning: impl Into<String>,
        parse_tier: ParseTier,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            trace_id: trace_id.into(),
            project_id: project_id.into(),
            evaluator_id: evaluator_id.into(),
            evaluator_name: evaluator_name.into(),
            job_id: None,
            score,
            reasoning: reasoning.into(),
            parse_tier,
            created_at: Utc::now(),
        }
    }

    pub fn with_job(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_get_distinct_ids() {
        let a = Score::new("t1", "p1", "e1", "Relevance", 8.0, "ok", ParseTier::Exact);
        let b = Score::new("t1", "p1", "e1", "Relevance", 8.0, "ok", ParseTier::Exact);
        assert_ne!(a.id, b.id);
        assert!(a.job_id.is_none());
        assert_eq!(a.with_job("job-1").job_id.as_deref(), Some("job-1"));
    }

    #[test]
    fn test_tier_serializes_as_reason_code() {
        assert_eq!(
            serde_json::to_string(&ParseTier::Defaulted).unwrap(),
            "\"defaulted\""
        );
    }
}
