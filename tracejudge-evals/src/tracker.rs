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

//! Job progress tracking.
//!
//! Counters move one task at a time under a job-scoped lock and each change
//! is written through to the job store. The terminal write happens once:
//! after it, the tracker ignores further outcomes and refuses a second
//! finish.

use crate::executor::{ProgressSink, TaskOutcome};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracejudge_core::{EvalJob, JobStatus, JobStore, Result, StoreError};
use tracing::{error, info, warn};

pub struct JobTracker {
    jobs: Arc<dyn JobStore>,
    job: Mutex<EvalJob>,
}

impl JobTracker {
    /// Mark a pending job running and persist it
    pub async fn start(jobs: Arc<dyn JobStore>, mut job: EvalJob) -> Result<Self> {
        job.transition(JobStatus::Running)?;
        jobs.insert_job(job.clone()).await?;
        Ok(Self {
            jobs,
            job: Mutex::new(job),
        })
    }

    pub async fn job(&self) -> EvalJob {
        self.job.lock().await.clone()
    }

    /// Count one task outcome
    pub async fn record_outcome(&self, success: bool) -> Result<()> {
        let mut job = self.job.lock().await;
        if job.status.is_terminal() {
            return Ok(());
        }
        if job.processed() >= job.total_count {
            warn!(job_id = %job.id, "Outcome beyond total count ignored");
            return Ok(());
        }
        if success {
            job.completed_count += 1;
        } else {
            job.failed_count += 1;
        }
        self.jobs.update_job(job.clone()).await
    }

    /// Terminal write from the counters: completed iff at least one task
    /// succeeded.
    pub async fn finish(&self) -> Result<EvalJob> {
        let mut job = self.job.lock().await;
        ensure_open(&job)?;
        let status = job.outcome_status();
        job.transition(status)?;
        self.jobs.update_job(job.clone()).await?;
        info!(
            job_id = %job.id,
            status = %job.status,
            completed = job.completed_count,
            failed = job.failed_count,
            "Job finished"
        );
        Ok(job.clone())
    }

    /// Terminal write for an error that escaped the batch. Tasks that never
    /// reported are counted as failed.
    pub async fn fail(&self, message: impl Into<String>) -> Result<EvalJob> {
        let mut job = self.job.lock().await;
        ensure_open(&job)?;
        let message = message.into();
        let remainder = job.total_count.saturating_sub(job.processed());
        job.failed_count += remainder;
        job.error_message = Some(message.clone());
        job.transition(JobStatus::Failed)?;
        self.jobs.update_job(job.clone()).await?;
        error!(job_id = %job.id, "Job failed: {}", message);
        Ok(job.clone())
    }
}

fn ensure_open(job: &EvalJob) -> Result<()> {
    if job.status.is_terminal() {
        return Err(StoreError::InvalidTransition(format!(
            "job {} already {}",
            job.id, job.status
        )));
    }
    Ok(())
}

#[async_trait]
impl ProgressSink for JobTracker {
    async fn record(&self, outcome: &TaskOutcome) {
        if let Err(e) = self.record_outcome(outcome.success).await {
            warn!("Failed to persist job progress: {}", e);
        }
    }
}
