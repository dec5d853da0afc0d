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

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracejudge_core::{
    DatasetItem, DatasetStore, EvaluatorStore, JobStatus, JobStore, LlmConfig, LlmConfigStore,
    ParseTier, ProviderKind, Score, ScoreStore, SourceType, Trace, TraceStore,
};
use tracejudge_evals::{
    preset_evaluators, seed_presets, ChatProvider, ChatRequest, ChatResponse, CreateJobRequest,
    EvalConfig, EvalExecutor, JobError, JobService, LlmError, ProviderFactory, TimeRange,
    TokenUsage,
};
use tracejudge_storage::MemoryStore;

/// Judge that scores 7 unless the prompt mentions `fail:`
struct FixedJudge;

#[async_trait]
impl ChatProvider for FixedJudge {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        if request.messages.iter().any(|m| m.content.contains("fail:")) {
            return Err(LlmError::InvalidResponse("judge refused".into()));
        }
        Ok(ChatResponse {
            content: "Score: 7 分，回答基本正确".into(),
            usage: TokenUsage::default(),
            model: "fixed".into(),
            finish_reason: "stop".into(),
        })
    }
}

struct FixedFactory;

impl ProviderFactory for FixedFactory {
    fn build(&self, _config: &LlmConfig) -> Result<Arc<dyn ChatProvider>, LlmError> {
        Ok(Arc::new(FixedJudge))
    }
}

/// Judge that answers after a delay
struct SlowJudge;

#[async_trait]
impl ChatProvider for SlowJudge {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, LlmError> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(ChatResponse {
            content: r#"{"score": 9, "reason": "thorough"}"#.into(),
            usage: TokenUsage::default(),
            model: "slow".into(),
            finish_reason: "stop".into(),
        })
    }
}

struct SlowFactory;

impl ProviderFactory for SlowFactory {
    fn build(&self, _config: &LlmConfig) -> Result<Arc<dyn ChatProvider>, LlmError> {
        Ok(Arc::new(SlowJudge))
    }
}

fn llm_config(id: &str, project_id: &str) -> LlmConfig {
    LlmConfig {
        id: id.into(),
        name: "judge".into(),
        project_id: project_id.into(),
        provider: ProviderKind::OpenAi,
        model_name: "gpt-4o-mini".into(),
        endpoint: None,
        credential_encrypted: String::new(),
        options: serde_json::json!({}),
        is_default: true,
        created_at: Utc::now(),
    }
}

async fn setup() -> (Arc<MemoryStore>, JobService) {
    setup_with(Arc::new(FixedFactory)).await
}

async fn setup_with(factory: Arc<dyn ProviderFactory>) -> (Arc<MemoryStore>, JobService) {
    let store = Arc::new(MemoryStore::new());
    seed_presets(store.as_ref()).await.unwrap();
    store.put_llm_config(llm_config("llm-1", "p1")).await.unwrap();

    for (id, input) in [("t1", "What is Rust?"), ("t2", "Explain ownership"), ("t3", "fail: nope")] {
        let mut trace = Trace::new(id, "p1");
        trace.input = Some(input.to_string());
        trace.output = Some("An answer".to_string());
        store.put_trace(trace).await.unwrap();
    }

    let executor = Arc::new(EvalExecutor::new(
        store.clone(),
        store.clone(),
        factory,
        EvalConfig::default(),
    ));
    let service = JobService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        executor,
    );
    (store, service)
}

fn request(source_type: SourceType, trace_ids: &[&str], evaluators: &[&str]) -> CreateJobRequest {
    CreateJobRequest {
        project_id: "p1".into(),
        name: None,
        source_type,
        trace_ids: trace_ids.iter().map(|s| s.to_string()).collect(),
        dataset_id: None,
        evaluator_ids: evaluators.iter().map(|s| s.to_string()).collect(),
        llm_config_id: "llm-1".into(),
    }
}

#[tokio::test]
async fn test_two_traces_three_evaluators_produce_six_scores() {
    let (store, service) = setup().await;
    let summary = service
        .create_job(request(
            SourceType::Traces,
            &["t1", "t2"],
            &["preset-relevance", "preset-accuracy", "preset-safety"],
        ))
        .await
        .unwrap();

    assert_eq!(summary.status, JobStatus::Completed);
    assert_eq!(summary.total_count, 6);
    assert_eq!(summary.completed_count, 6);
    assert_eq!(summary.failed_count, 0);

    let scores = store.scores_by_job(&summary.id).await.unwrap();
    assert_eq!(scores.len(), 6);
    assert!(scores
        .iter()
        .all(|s| s.score == 7.0 && s.parse_tier == ParseTier::Approximate));

    let item = service.get_job(&summary.id).await.unwrap();
    assert_eq!(item.progress, 100);
    assert!(item.job.name.starts_with("评测任务 "));
    assert!(item.job.started_at.is_some());
    assert!(item.job.completed_at.is_some());
}

#[tokio::test]
async fn test_partial_failure_still_completes() {
    let (_, service) = setup().await;
    let summary = service
        .create_job(request(SourceType::Traces, &["t1", "t3"], &["preset-tone"]))
        .await
        .unwrap();
    assert_eq!(summary.status, JobStatus::Completed);
    assert_eq!(summary.completed_count, 1);
    assert_eq!(summary.failed_count, 1);
    assert_eq!(service.get_job(&summary.id).await.unwrap().progress, 50);
}

#[tokio::test]
async fn test_every_task_failing_marks_job_failed() {
    let (_, service) = setup().await;
    let summary = service
        .create_job(request(SourceType::Trace, &["t3"], &["preset-tone", "preset-safety"]))
        .await
        .unwrap();
    assert_eq!(summary.status, JobStatus::Failed);
    assert_eq!(summary.failed_count, 2);
    assert_eq!(summary.completed_count, 0);
}

#[tokio::test]
async fn test_missing_traces_are_skipped() {
    let (_, service) = setup().await;
    let summary = service
        .create_job(request(SourceType::Traces, &["t1", "ghost"], &["preset-tone"]))
        .await
        .unwrap();
    assert_eq!(summary.total_count, 1);
}

#[tokio::test]
async fn test_rejections_write_nothing() {
    let (store, service) = setup().await;

    let err = service
        .create_job(request(SourceType::Traces, &["t1"], &["unknown-evaluator"]))
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::NoEvaluators));

    let mut bad_llm = request(SourceType::Traces, &["t1"], &["preset-tone"]);
    bad_llm.llm_config_id = "missing".into();
    let err = service.create_job(bad_llm).await.unwrap_err();
    assert!(matches!(err, JobError::LlmConfigNotFound(id) if id == "missing"));

    let err = service
        .create_job(request(SourceType::Trace, &["t1", "t2"], &["preset-tone"]))
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::NoTraceData));

    let err = service
        .create_job(request(SourceType::Traces, &["ghost"], &["preset-tone"]))
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::NoTraceData));

    let page = service.list_jobs("p1", None, None, 0).await.unwrap();
    assert_eq!(page.total, 0);
    assert!(store.list_scores("p1", 100, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_traces_from_other_projects_are_not_evaluated() {
    let (store, service) = setup().await;
    store.put_trace(Trace::new("foreign", "p2")).await.unwrap();
    let err = service
        .create_job(request(SourceType::Trace, &["foreign"], &["preset-tone"]))
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::NoTraceData));
}

#[tokio::test]
async fn test_dataset_source_uses_item_trace_ids() {
    let (store, service) = setup().await;
    store
        .put_dataset_item(DatasetItem {
            id: "item-1".into(),
            dataset_id: "ds-1".into(),
            trace_id: Some("t1".into()),
            input: serde_json::json!({"question": "hi"}),
            output: serde_json::Value::Null,
        })
        .await
        .unwrap();
    store
        .put_dataset_item(DatasetItem {
            id: "item-2".into(),
            dataset_id: "ds-1".into(),
            trace_id: None,
            input: serde_json::json!("plain"),
            output: serde_json::json!("reply"),
        })
        .await
        .unwrap();

    let mut req = request(SourceType::Dataset, &[], &["preset-relevance"]);
    req.dataset_id = Some("ds-1".into());
    req.name = Some("dataset run".into());
    let summary = service.create_job(req).await.unwrap();

    assert_eq!(summary.total_count, 2);
    let mut trace_ids: Vec<_> = service
        .job_scores(&summary.id)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.trace_id)
        .collect();
    trace_ids.sort();
    assert_eq!(trace_ids, vec!["item-2", "t1"]);
    assert_eq!(service.get_job(&summary.id).await.unwrap().job.name, "dataset run");
}

#[tokio::test]
async fn test_list_jobs_clamps_limit_and_counts_total() {
    let (_, service) = setup().await;
    for _ in 0..3 {
        service
            .create_job(request(SourceType::Trace, &["t1"], &["preset-tone"]))
            .await
            .unwrap();
    }

    let page = service.list_jobs("p1", None, Some(0), 0).await.unwrap();
    assert_eq!(page.limit, 1);
    assert_eq!(page.jobs.len(), 1);
    assert_eq!(page.total, 3);

    let page = service.list_jobs("p1", None, Some(500), 1).await.unwrap();
    assert_eq!(page.limit, 100);
    assert_eq!(page.jobs.len(), 2);

    let page = service
        .list_jobs("p1", Some(JobStatus::Failed), None, 0)
        .await
        .unwrap();
    assert_eq!(page.total, 0);
    assert_eq!(page.limit, 20);
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let (_, service) = setup().await;
    assert!(matches!(
        service.get_job("nope").await,
        Err(JobError::NotFound(_))
    ));
    assert!(matches!(
        service.job_scores("nope").await,
        Err(JobError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_job_finishes_after_caller_stops_waiting() {
    let (store, service) = setup_with(Arc::new(SlowFactory)).await;

    let waited = tokio::time::timeout(
        Duration::from_millis(50),
        service.create_job(request(SourceType::Trace, &["t1"], &["preset-tone"])),
    )
    .await;
    assert!(waited.is_err());

    let page = service.list_jobs("p1", None, None, 0).await.unwrap();
    assert_eq!(page.total, 1);
    let job_id = page.jobs[0].job.id.clone();

    let mut job = store.get_job(&job_id).await.unwrap().unwrap();
    for _ in 0..100 {
        if job.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        job = store.get_job(&job_id).await.unwrap().unwrap();
    }

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.completed_count, 1);
    assert!(job.completed_at.is_some());
    assert_eq!(store.scores_by_job(&job_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_private_evaluators_stay_in_their_project() {
    let (store, service) = setup().await;
    let mut private = preset_evaluators()[0].clone();
    private.id = "p2-private".into();
    private.preset = false;
    private.project_id = Some("p2".into());
    store.upsert_evaluator(private).await.unwrap();

    let err = service
        .create_job(request(SourceType::Trace, &["t1"], &["p2-private"]))
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::NoEvaluators));

    let summary = service
        .create_job(request(SourceType::Trace, &["t1"], &["p2-private", "preset-tone"]))
        .await
        .unwrap();
    assert_eq!(summary.total_count, 1);
    let job = service.get_job(&summary.id).await.unwrap().job;
    assert_eq!(job.evaluator_ids, vec!["preset-tone".to_string()]);
}

#[tokio::test]
async fn test_llm_config_of_another_project_is_not_found() {
    let (store, service) = setup().await;
    store.put_llm_config(llm_config("llm-p2", "p2")).await.unwrap();
    store.put_llm_config(llm_config("llm-shared", "")).await.unwrap();

    let mut foreign = request(SourceType::Trace, &["t1"], &["preset-tone"]);
    foreign.llm_config_id = "llm-p2".into();
    let err = service.create_job(foreign).await.unwrap_err();
    assert!(matches!(err, JobError::LlmConfigNotFound(id) if id == "llm-p2"));
    assert_eq!(service.list_jobs("p1", None, None, 0).await.unwrap().total, 0);

    let mut shared = request(SourceType::Trace, &["t1"], &["preset-tone"]);
    shared.llm_config_id = "llm-shared".into();
    let summary = service.create_job(shared).await.unwrap();
    assert_eq!(summary.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_job_summary_and_results_by_trace() {
    let (_, service) = setup().await;
    let summary = service
        .create_job(request(
            SourceType::Traces,
            &["t1", "t2", "t3"],
            &["preset-relevance", "preset-tone"],
        ))
        .await
        .unwrap();
    assert_eq!(summary.completed_count, 4);

    let stats = service.job_summary(&summary.id).await.unwrap();
    assert_eq!(stats.total_count, 4);
    assert_eq!(stats.total_traces, 2);
    assert_eq!(stats.evaluators.len(), 2);
    for evaluator in &stats.evaluators {
        assert_eq!(evaluator.count, 2);
        assert_eq!(evaluator.avg_score, 7.0);
        assert_eq!(evaluator.pass_rate, 1.0);
    }

    let results = service.job_results(&summary.id).await.unwrap();
    let trace_ids: Vec<_> = results.iter().map(|r| r.trace_id.as_str()).collect();
    assert_eq!(trace_ids, vec!["t1", "t2"]);
    assert!(results.iter().all(|r| r.scores.len() == 2));

    assert!(matches!(
        service.job_summary("nope").await,
        Err(JobError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_project_summary_respects_time_range() {
    let (store, service) = setup().await;
    store
        .append_score(Score::new("t1", "p1", "manual", "manual", 9.0, "fresh", ParseTier::Manual))
        .await
        .unwrap();
    let mut stale = Score::new("t2", "p1", "manual", "manual", 2.0, "stale", ParseTier::Manual);
    stale.created_at = Utc::now() - ChronoDuration::days(10);
    store.append_score(stale).await.unwrap();
    store
        .append_score(Score::new("x1", "p2", "manual", "manual", 1.0, "other", ParseTier::Manual))
        .await
        .unwrap();

    let week = service.project_summary("p1", TimeRange::Week).await.unwrap();
    assert_eq!(week.total_count, 1);
    assert_eq!(week.evaluators[0].avg_score, 9.0);

    let month = service.project_summary("p1", TimeRange::Month).await.unwrap();
    assert_eq!(month.total_count, 2);
    assert_eq!(month.evaluators[0].avg_score, 5.5);
    assert_eq!(month.evaluators[0].pass_rate, 0.5);
}
