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

//! Evaluation jobs and their one-way lifecycle.

use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Allowed moves: pending → running, running → completed | failed.
    /// A pending job may also fail directly when it never started.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Where a job's traces come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Exactly one trace id
    Trace,
    /// A list of trace ids; unknown ids are skipped
    Traces,
    /// All items of a dataset
    Dataset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSource {
    pub source_type: SourceType,
    #[serde(default)]
    pub trace_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<String>,
}

/// One execution of a set of evaluators against a set of traces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalJob {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub source: JobSource,
    pub evaluator_ids: Vec<String>,
    pub llm_config_id: String,
    pub status: JobStatus,
    /// Fixed at creation: traces × evaluators
    pub total_count: u64,
    pub completed_count: u64,
    pub failed_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl EvalJob {
    /// Move to `next`, stamping the matching timestamp.
    pub fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(StoreError::InvalidTransition(format!(
                "job {}: {} -> {}",
                self.id, self.status, next
            )));
        }
        let now = Utc::now();
        match next {
            JobStatus::Running => self.started_at = Some(now),
            JobStatus::Completed | JobStatus::Failed => self.completed_at = Some(now),
            JobStatus::Pending => {}
        }
        self.status = next;
        Ok(())
    }

    /// Tasks that have reported an outcome so far
    pub fn processed(&self) -> u64 {
        self.completed_count + self.failed_count
    }

    /// Rounded completion percentage, 0 for an empty job
    pub fn progress(&self) -> u32 {
        if self.total_count == 0 {
            return 0;
        }
        ((self.completed_count as f64 / self.total_count as f64) * 100.0).round() as u32
    }

    /// Terminal status implied by the counters
    pub fn outcome_status(&self) -> JobStatus {
        if self.completed_count > 0 {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> EvalJob {
        EvalJob {
            id: "job-1".into(),
            project_id: "p1".into(),
            name: "nightly".into(),
            source: JobSource {
                source_type: SourceType::Traces,
                trace_ids: vec!["t1".into(), "t2".into()],
                dataset_id: None,
            },
            evaluator_ids: vec!["e1".into()],
            llm_config_id: "llm-1".into(),
            status: JobStatus::Pending,
            total_count: 2,
            completed_count: 0,
            failed_count: 0,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn test_lifecycle_is_one_way() {
        let mut job = job();
        job.transition(JobStatus::Running).unwrap();
        assert!(job.started_at.is_some());
        job.transition(JobStatus::Completed).unwrap();
        assert!(job.completed_at.is_some());

        assert!(job.transition(JobStatus::Running).is_err());
        assert!(job.transition(JobStatus::Failed).is_err());
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn test_terminal_states_never_reopen() {
        for terminal in [JobStatus::Completed, JobStatus::Failed] {
            for next in [
                JobStatus::Pending,
                JobStatus::Running,
                JobStatus::Completed,
                JobStatus::Failed,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_progress_and_outcome() {
        let mut job = job();
        assert_eq!(job.progress(), 0);
        assert_eq!(job.outcome_status(), JobStatus::Failed);

        job.completed_count = 1;
        job.failed_count = 1;
        assert_eq!(job.progress(), 50);
        assert_eq!(job.processed(), 2);
        assert_eq!(job.outcome_status(), JobStatus::Completed);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("running".parse::<JobStatus>(), Ok(JobStatus::Running));
        assert!("done".parse::<JobStatus>().is_err());
    }
}
