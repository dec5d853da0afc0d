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

//! In-memory implementation of every store contract.
//!
//! Maps are sharded (`DashMap`) so concurrent ingestion and evaluation
//! workers do not contend on one lock. Scores live in an append-only log.
//! When opened with a snapshot path, every write marks the store dirty and
//! [`MemoryStore::flush`] persists the full state as JSON.

use crate::snapshot::Snapshot;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracejudge_core::{
    DatasetItem, DatasetStore, EvalJob, EvaluatorStore, EvaluatorTemplate, JobStatus, JobStore,
    LlmConfig, LlmConfigStore, Result, Score, ScoreStore, StoreError, Trace, TraceStore,
};
use tracing::{debug, info};

#[derive(Default)]
struct ScoreLog {
    rows: Vec<Score>,
    ids: HashSet<String>,
}

/// Thread-safe store shared across the server and evaluation workers
#[derive(Default)]
pub struct MemoryStore {
    traces: DashMap<String, Trace>,
    scores: RwLock<ScoreLog>,
    jobs: DashMap<String, EvalJob>,
    evaluators: DashMap<String, EvaluatorTemplate>,
    llm_configs: DashMap<String, LlmConfig>,
    dataset_items: DashMap<String, Vec<DatasetItem>>,
    snapshot_path: Option<PathBuf>,
    dirty: AtomicBool,
    flush_lock: Mutex<()>,
}

impl MemoryStore {
    /// Empty, purely in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store backed by a JSON snapshot at `path`, loading it if present
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let snapshot = Snapshot::load(&path)?;
        let store = Self {
            snapshot_path: Some(path),
            ..Self::default()
        };
        store.restore(snapshot);
        Ok(store)
    }

    fn restore(&self, snapshot: Snapshot) {
        for trace in snapshot.traces {
            self.traces.insert(trace.id.clone(), trace);
        }
        {
            let mut log = self.scores.write();
            for score in snapshot.scores {
                if log.ids.insert(score.id.clone()) {
                    log.rows.push(score);
                }
            }
        }
        for job in snapshot.jobs {
            self.jobs.insert(job.id.clone(), job);
        }
        for evaluator in snapshot.evaluators {
            self.evaluators.insert(evaluator.id.clone(), evaluator);
        }
        for config in snapshot.llm_configs {
            self.llm_configs.insert(config.id.clone(), config);
        }
        for item in snapshot.dataset_items {
            self.insert_dataset_item(item);
        }
    }

    /// Capture the current state
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            traces: self.traces.iter().map(|e| e.value().clone()).collect(),
            scores: self.scores.read().rows.clone(),
            jobs: self.jobs.iter().map(|e| e.value().clone()).collect(),
            evaluators: self.evaluators.iter().map(|e| e.value().clone()).collect(),
            llm_configs: self.llm_configs.iter().map(|e| e.value().clone()).collect(),
            dataset_items: self
                .dataset_items
                .iter()
                .flat_map(|e| e.value().clone())
                .collect(),
        }
    }

    /// Persist the snapshot if anything changed since the last flush.
    ///
    /// Returns `true` when a snapshot was written. A store without a snapshot
    /// path never writes.
    pub fn flush(&self) -> Result<bool> {
        let Some(path) = &self.snapshot_path else {
            return Ok(false);
        };
        let _guard = self.flush_lock.lock();
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        if let Err(e) = self.snapshot().save(path) {
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }
        debug!("Snapshot written to {}", path.display());
        Ok(true)
    }

    pub fn trace_count(&self) -> usize {
        self.traces.len()
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    fn insert_dataset_item(&self, item: DatasetItem) {
        let mut items = self.dataset_items.entry(item.dataset_id.clone()).or_default();
        match items.iter().position(|existing| existing.id == item.id) {
            Some(pos) => items[pos] = item,
            None => items.push(item),
        }
    }
}

fn page<T>(mut rows: Vec<T>, limit: usize, offset: usize) -> Vec<T> {
    if offset >= rows.len() {
        return Vec::new();
    }
    let end = offset.saturating_add(limit).min(rows.len());
    rows.truncate(end);
    rows.split_off(offset)
}

#[async_trait]
impl TraceStore for MemoryStore {
    async fn get_trace(&self, id: &str) -> Result<Option<Trace>> {
        Ok(self.traces.get(id).map(|t| t.clone()))
    }

    async fn put_trace(&self, trace: Trace) -> Result<()> {
        self.traces.insert(trace.id.clone(), trace);
        self.mark_dirty();
        Ok(())
    }

    async fn list_traces(
        &self,
        project_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Trace>> {
        let mut rows: Vec<Trace> = self
            .traces
            .iter()
            .filter(|t| t.project_id == project_id)
            .map(|t| t.clone())
            .collect();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(page(rows, limit, offset))
    }
}

#[async_trait]
impl ScoreStore for MemoryStore {
    async fn append_score(&self, score: Score) -> Result<()> {
        {
            let mut log = self.scores.write();
            if !log.ids.insert(score.id.clone()) {
                return Err(StoreError::Conflict(format!("score {} already exists", score.id)));
            }
            log.rows.push(score);
        }
        self.mark_dirty();
        Ok(())
    }

    async fn scores_by_job(&self, job_id: &str) -> Result<Vec<Score>> {
        Ok(self
            .scores
            .read()
            .rows
            .iter()
            .filter(|s| s.job_id.as_deref() == Some(job_id))
            .cloned()
            .collect())
    }

    async fn scores_by_trace(&self, trace_id: &str) -> Result<Vec<Score>> {
        Ok(self
            .scores
            .read()
            .rows
            .iter()
            .filter(|s| s.trace_id == trace_id)
            .cloned()
            .collect())
    }

    async fn list_scores(
        &self,
        project_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Score>> {
        let rows: Vec<Score> = self
            .scores
            .read()
            .rows
            .iter()
            .rev()
            .filter(|s| s.project_id == project_id)
            .cloned()
            .collect();
        Ok(page(rows, limit, offset))
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_job(&self, job: EvalJob) -> Result<()> {
        if self.jobs.contains_key(&job.id) {
            return Err(StoreError::Conflict(format!("job {} already exists", job.id)));
        }
        info!(job_id = %job.id, status = %job.status, "Job created");
        self.jobs.insert(job.id.clone(), job);
        self.mark_dirty();
        Ok(())
    }

    async fn update_job(&self, job: EvalJob) -> Result<()> {
        {
            let mut stored = self
                .jobs
                .get_mut(&job.id)
                .ok_or_else(|| StoreError::NotFound(format!("job {}", job.id)))?;
            if stored.status.is_terminal() {
                return Err(StoreError::InvalidTransition(format!(
                    "job {} is already {}",
                    job.id, stored.status
                )));
            }
            *stored = job;
        }
        self.mark_dirty();
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<EvalJob>> {
        Ok(self.jobs.get(id).map(|j| j.clone()))
    }

    async fn list_jobs(
        &self,
        project_id: &str,
        status: Option<JobStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<EvalJob>> {
        let mut rows: Vec<EvalJob> = self
            .jobs
            .iter()
            .filter(|j| j.project_id == project_id)
            .filter(|j| status.map_or(true, |s| j.status == s))
            .map(|j| j.clone())
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(page(rows, limit, offset))
    }
}

#[async_trait]
impl EvaluatorStore for MemoryStore {
    async fn get_active_evaluators(&self, ids: &[String]) -> Result<Vec<EvaluatorTemplate>> {
        let mut seen = HashSet::new();
        Ok(ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .filter_map(|id| self.evaluators.get(id).map(|e| e.clone()))
            .filter(|e| e.active)
            .collect())
    }

    async fn list_evaluators(&self, project_id: &str) -> Result<Vec<EvaluatorTemplate>> {
        let mut rows: Vec<EvaluatorTemplate> = self
            .evaluators
            .iter()
            .filter(|e| e.active && e.visible_to(project_id))
            .map(|e| e.clone())
            .collect();
        rows.sort_by(|a, b| b.preset.cmp(&a.preset).then_with(|| a.name.cmp(&b.name)));
        Ok(rows)
    }

    async fn upsert_evaluator(&self, evaluator: EvaluatorTemplate) -> Result<()> {
        if let Some(existing) = self.evaluators.get(&evaluator.id) {
            if existing.preset && !evaluator.preset {
                return Err(StoreError::Conflict(format!(
                    "preset evaluator {} cannot be replaced",
                    evaluator.id
                )));
            }
        }
        self.evaluators.insert(evaluator.id.clone(), evaluator);
        self.mark_dirty();
        Ok(())
    }
}

#[async_trait]
impl LlmConfigStore for MemoryStore {
    async fn get_llm_config(&self, id: &str) -> Result<Option<LlmConfig>> {
        Ok(self.llm_configs.get(id).map(|c| c.clone()))
    }

    async fn put_llm_config(&self, config: LlmConfig) -> Result<()> {
        self.llm_configs.insert(config.id.clone(), config);
        self.mark_dirty();
        Ok(())
    }
}

#[async_trait]
impl DatasetStore for MemoryStore {
    async fn dataset_items(&self, dataset_id: &str) -> Result<Vec<DatasetItem>> {
        Ok(self
            .dataset_items
            .get(dataset_id)
            .map(|items| items.clone())
            .unwrap_or_default())
    }

    async fn put_dataset_item(&self, item: DatasetItem) -> Result<()> {
        self.insert_dataset_item(item);
        self.mark_dirty();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tracejudge_core::{JobSource, ParseTier, SourceType};

    fn job(id: &str, project: &str) -> EvalJob {
        EvalJob {
            id: id.to_string(),
            project_id: project.to_string(),
            name: id.to_string(),
            source: JobSource {
                source_type: SourceType::Trace,
                trace_ids: vec!["t1".into()],
                dataset_id: None,
            },
            evaluator_ids: vec!["e1".into()],
            llm_config_id: "llm".into(),
            status: JobStatus::Running,
            total_count: 1,
            completed_count: 0,
            failed_count: 0,
            error_message: None,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
        }
    }

    fn evaluator(id: &str, active: bool, preset: bool) -> EvaluatorTemplate {
        EvaluatorTemplate {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            prompt_template: "{{input}} {{output}}".into(),
            score_type: Default::default(),
            min_score: 0.0,
            max_score: 10.0,
            preset,
            active,
            project_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_page_bounds() {
        assert_eq!(page(vec![1, 2, 3, 4], 2, 1), vec![2, 3]);
        assert_eq!(page(vec![1, 2, 3], 10, 2), vec![3]);
        assert!(page(vec![1, 2, 3], 10, 3).is_empty());
        assert!(page(Vec::<u8>::new(), 10, 0).is_empty());
    }

    #[tokio::test]
    async fn test_traces_listed_newest_first_per_project() {
        let store = MemoryStore::new();
        let mut old = Trace::new("old", "p1");
        old.timestamp = Utc::now() - Duration::hours(1);
        store.put_trace(old).await.unwrap();
        store.put_trace(Trace::new("new", "p1")).await.unwrap();
        store.put_trace(Trace::new("other", "p2")).await.unwrap();

        let rows = store.list_traces("p1", 10, 0).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn test_scores_are_append_only() {
        let store = MemoryStore::new();
        let score = Score::new("t1", "p1", "e1", "Relevance", 7.0, "fine", ParseTier::Exact)
            .with_job("job-1");
        store.append_score(score.clone()).await.unwrap();
        assert!(matches!(
            store.append_score(score).await,
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(store.scores_by_job("job-1").await.unwrap().len(), 1);
        assert_eq!(store.scores_by_trace("t1").await.unwrap().len(), 1);
        assert!(store.scores_by_job("job-2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_terminal_job_is_never_rewritten() {
        let store = MemoryStore::new();
        let mut j = job("job-1", "p1");
        store.insert_job(j.clone()).await.unwrap();

        j.completed_count = 1;
        j.transition(JobStatus::Completed).unwrap();
        store.update_job(j.clone()).await.unwrap();

        j.failed_count = 1;
        assert!(matches!(
            store.update_job(j).await,
            Err(StoreError::InvalidTransition(_))
        ));
        let stored = store.get_job("job-1").await.unwrap().unwrap();
        assert_eq!(stored.failed_count, 0);
        assert_eq!(stored.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_list_jobs_filters_by_status() {
        let store = MemoryStore::new();
        store.insert_job(job("a", "p1")).await.unwrap();
        let mut done = job("b", "p1");
        done.status = JobStatus::Completed;
        store.insert_job(done).await.unwrap();

        let running = store
            .list_jobs("p1", Some(JobStatus::Running), 10, 0)
            .await
            .unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, "a");
        assert_eq!(store.list_jobs("p1", None, 10, 0).await.unwrap().len(), 2);
        assert!(store.list_jobs("p2", None, 10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_only_active_evaluators_are_resolved() {
        let store = MemoryStore::new();
        store.upsert_evaluator(evaluator("on", true, false)).await.unwrap();
        store.upsert_evaluator(evaluator("off", false, false)).await.unwrap();

        let ids = vec!["on".to_string(), "off".to_string(), "missing".to_string()];
        let found = store.get_active_evaluators(&ids).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "on");
    }

    #[tokio::test]
    async fn test_presets_cannot_be_replaced_by_custom() {
        let store = MemoryStore::new();
        store.upsert_evaluator(evaluator("preset-x", true, true)).await.unwrap();
        assert!(store
            .upsert_evaluator(evaluator("preset-x", true, false))
            .await
            .is_err());
        store.upsert_evaluator(evaluator("preset-x", true, true)).await.unwrap();
    }

    #[tokio::test]
    async fn test_dataset_items_replace_by_id() {
        let store = MemoryStore::new();
        let item = DatasetItem {
            id: "i1".into(),
            dataset_id: "ds".into(),
            trace_id: None,
            input: serde_json::json!("a"),
            output: serde_json::Value::Null,
        };
        store.put_dataset_item(item.clone()).await.unwrap();
        store
            .put_dataset_item(DatasetItem {
                input: serde_json::json!("b"),
                ..item
            })
            .await
            .unwrap();
        let items = store.dataset_items("ds").await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].input, serde_json::json!("b"));
        assert!(store.dataset_items("none").await.unwrap().is_empty());
    }

    #[test]
    fn test_flush_without_path_is_noop() {
        let store = MemoryStore::new();
        store.mark_dirty();
        assert!(!store.flush().unwrap());
    }
}
