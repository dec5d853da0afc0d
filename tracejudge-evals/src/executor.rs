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

//! Evaluation executor.
//!
//! Runs N×M judge calls for one LLM backend. Every task is isolated: a
//! missing config, provider error, timeout or store failure fails that task
//! only and the batch always returns one outcome per task.

use crate::parser::{parse, Judgement};
use crate::prompt::render;
use crate::providers::{ChatMessage, ChatProvider, ChatRequest, ProviderFactory};
use crate::{EvalConfig, EvalError};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracejudge_core::{LlmConfigStore, ParseTier, ProviderKind, Score, ScoreStore};
use tracing::{debug, info, warn};

/// System instruction sent with every judge call
pub const JUDGE_SYSTEM_PROMPT: &str = "你是一个专业的 AI 评测员。请根据给定的评测标准对 AI 回复进行评分。

严格要求：
1. 只返回纯 JSON 对象，格式为: {\"score\": 0-10的数字, \"reason\": \"详细评分理由\"}
2. 不要使用 Markdown 代码块（不要用 ```）
3. 不要添加任何其他文字说明
4. reason 字段必须包含 20 字以上的详细理由";

/// One (trace, evaluator) pair to score
#[derive(Debug, Clone)]
pub struct EvalTask {
    pub trace_id: String,
    pub trace_input: String,
    pub trace_output: String,
    pub evaluator_id: String,
    pub evaluator_name: String,
    pub prompt_template: String,
    pub project_id: String,
    pub job_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutcome {
    pub trace_id: String,
    pub evaluator_id: String,
    pub evaluator_name: String,
    pub score: f64,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_tier: Option<ParseTier>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskOutcome {
    fn from_result(task: EvalTask, result: Result<Judgement, EvalError>) -> Self {
        match result {
            Ok(judgement) => Self {
                trace_id: task.trace_id,
                evaluator_id: task.evaluator_id,
                evaluator_name: task.evaluator_name,
                score: judgement.score,
                reason: judgement.reason,
                parse_tier: Some(judgement.tier),
                success: true,
                error: None,
            },
            Err(e) => Self::failed(task, e.to_string()),
        }
    }

    fn failed(task: EvalTask, message: String) -> Self {
        Self {
            trace_id: task.trace_id,
            evaluator_id: task.evaluator_id,
            evaluator_name: task.evaluator_name,
            score: 0.0,
            reason: message.clone(),
            parse_tier: None,
            success: false,
            error: Some(message),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub results: Vec<TaskOutcome>,
    pub success_count: u64,
    pub failed_count: u64,
}

/// Receives each task outcome as soon as it is known
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn record(&self, outcome: &TaskOutcome);
}

pub struct EvalExecutor {
    llm_configs: Arc<dyn LlmConfigStore>,
    scores: Arc<dyn ScoreStore>,
    factory: Arc<dyn ProviderFactory>,
    config: EvalConfig,
    limiters: DashMap<ProviderKind, Arc<Semaphore>>,
}

impl EvalExecutor {
    pub fn new(
        llm_configs: Arc<dyn LlmConfigStore>,
        scores: Arc<dyn ScoreStore>,
        factory: Arc<dyn ProviderFactory>,
        config: EvalConfig,
    ) -> Self {
        Self {
            llm_configs,
            scores,
            factory,
            config,
            limiters: DashMap::new(),
        }
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Permit pool for a provider kind, shared by every job
    fn limiter(&self, kind: ProviderKind) -> Arc<Semaphore> {
        self.limiters
            .entry(kind)
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.max_concurrent_per_provider.max(1))))
            .clone()
    }

    async fn resolve_provider(&self, llm_config_id: &str) -> Result<Arc<dyn ChatProvider>, EvalError> {
        let config = self
            .llm_configs
            .get_llm_config(llm_config_id)
            .await?
            .ok_or_else(|| EvalError::LlmConfigNotFound(llm_config_id.to_string()))?;
        Ok(self.factory.build(&config)?)
    }

    /// Run every task against one LLM backend.
    ///
    /// Outcomes are reported to `sink` in completion order; the summary holds
    /// exactly one outcome per task.
    #[tracing::instrument(skip(self, tasks, sink), fields(tasks = tasks.len()))]
    pub async fn execute_batch(
        &self,
        tasks: Vec<EvalTask>,
        llm_config_id: &str,
        sink: Option<&dyn ProgressSink>,
    ) -> BatchSummary {
        let mut summary = BatchSummary::default();

        let provider = match self.resolve_provider(llm_config_id).await {
            Ok(provider) => provider,
            Err(e) => {
                warn!("Cannot build provider for {}: {}", llm_config_id, e);
                let message = e.to_string();
                for task in tasks {
                    report(&mut summary, TaskOutcome::failed(task, message.clone()), sink).await;
                }
                return summary;
            }
        };

        let limiter = self.limiter(provider.kind());
        let in_flight = self.config.max_concurrent_per_provider.max(1);
        let mut outcomes = stream::iter(tasks.into_iter().map(|task| {
            let provider = provider.clone();
            let limiter = limiter.clone();
            async move {
                let result = self.run_task(&task, provider.as_ref(), &limiter).await;
                TaskOutcome::from_result(task, result)
            }
        }))
        .buffer_unordered(in_flight);

        while let Some(outcome) = outcomes.next().await {
            report(&mut summary, outcome, sink).await;
        }

        info!(
            success = summary.success_count,
            failed = summary.failed_count,
            "Evaluation batch finished"
        );
        summary
    }

    async fn run_task(
        &self,
        task: &EvalTask,
        provider: &dyn ChatProvider,
        limiter: &Semaphore,
    ) -> Result<Judgement, EvalError> {
        let prompt = render(&task.prompt_template, &task.trace_input, &task.trace_output);
        let request = ChatRequest {
            messages: vec![
                ChatMessage::system(JUDGE_SYSTEM_PROMPT),
                ChatMessage::user(prompt),
            ],
            temperature: Some(self.config.temperature),
            max_tokens: Some(self.config.max_tokens),
            top_p: None,
        };

        let response = {
            let _permit = limiter
                .acquire()
                .await
                .map_err(|e| EvalError::Internal(e.to_string()))?;
            tokio::time::timeout(self.config.call_timeout(), provider.chat(request))
                .await
                .map_err(|_| EvalError::Timeout(self.config.call_timeout_secs))??
        };

        let judgement = parse(&response.content);
        debug!(
            trace_id = %task.trace_id,
            evaluator = %task.evaluator_name,
            score = judgement.score,
            tier = ?judgement.tier,
            "Judge call parsed"
        );

        let score = Score::new(
            task.trace_id.clone(),
            task.project_id.clone(),
            task.evaluator_id.clone(),
            task.evaluator_name.clone(),
            judgement.score,
            judgement.reason.clone(),
            judgement.tier,
        )
        .with_job(task.job_id.clone());
        self.scores.append_score(score).await?;

        Ok(judgement)
    }
}

async fn report(summary: &mut BatchSummary, outcome: TaskOutcome, sink: Option<&dyn ProgressSink>) {
    if outcome.success {
        summary.success_count += 1;
    } else {
        debug!(
            trace_id = %outcome.trace_id,
            evaluator = %outcome.evaluator_name,
            "Task failed: {}",
            outcome.error.as_deref().unwrap_or_default()
        );
        summary.failed_count += 1;
    }
    if let Some(sink) = sink {
        sink.record(&outcome).await;
    }
    summary.results.push(outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ChatResponse, LlmError, TokenUsage};
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tracejudge_core::LlmConfig;
    use tracejudge_storage::MemoryStore;

    /// Replies per trace id: `fail:*` errors, `slow:*` hangs, others score 8
    struct ScriptedProvider {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::OpenAi
        }

        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let prompt = &request.messages[1].content;
            if prompt.contains("fail:") {
                return Err(LlmError::Api {
                    provider: ProviderKind::OpenAi,
                    status: 500,
                    message: "upstream exploded".into(),
                });
            }
            if prompt.contains("slow:") {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Ok(ChatResponse {
                content: r#"{"score": 8, "reason": "solid answer"}"#.into(),
                usage: TokenUsage::default(),
                model: "scripted".into(),
                finish_reason: "stop".into(),
            })
        }
    }

    struct ScriptedFactory(Arc<ScriptedProvider>);

    impl ProviderFactory for ScriptedFactory {
        fn build(&self, _config: &LlmConfig) -> Result<Arc<dyn ChatProvider>, LlmError> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct CollectingSink(Mutex<Vec<bool>>);

    #[async_trait]
    impl ProgressSink for CollectingSink {
        async fn record(&self, outcome: &TaskOutcome) {
            self.0.lock().push(outcome.success);
        }
    }

    fn llm_config() -> LlmConfig {
        LlmConfig {
            id: "llm-1".into(),
            name: "judge".into(),
            project_id: "p1".into(),
            provider: ProviderKind::OpenAi,
            model_name: "scripted".into(),
            endpoint: None,
            credential_encrypted: String::new(),
            options: serde_json::json!({}),
            is_default: true,
            created_at: Utc::now(),
        }
    }

    fn task(trace: &str) -> EvalTask {
        EvalTask {
            trace_id: trace.to_string(),
            trace_input: format!("question for {}", trace),
            trace_output: "answer".into(),
            evaluator_id: "e1".into(),
            evaluator_name: "Relevance".into(),
            prompt_template: "Q: {{input}} A: {{output}}".into(),
            project_id: "p1".into(),
            job_id: "job-1".into(),
        }
    }

    async fn setup(config: EvalConfig) -> (Arc<MemoryStore>, Arc<ScriptedProvider>, EvalExecutor) {
        let store = Arc::new(MemoryStore::new());
        store.put_llm_config(llm_config()).await.unwrap();
        let provider = Arc::new(ScriptedProvider {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let executor = EvalExecutor::new(
            store.clone(),
            store.clone(),
            Arc::new(ScriptedFactory(provider.clone())),
            config,
        );
        (store, provider, executor)
    }

    #[tokio::test]
    async fn test_one_failing_task_does_not_affect_others() {
        let (store, _, executor) = setup(EvalConfig::default()).await;
        let tasks = vec![task("t1"), task("fail:t2"), task("t3"), task("t4")];
        let sink = CollectingSink::default();

        let summary = executor.execute_batch(tasks, "llm-1", Some(&sink)).await;

        assert_eq!(summary.results.len(), 4);
        assert_eq!(summary.success_count, 3);
        assert_eq!(summary.failed_count, 1);
        let failed: Vec<_> = summary.results.iter().filter(|r| !r.success).collect();
        assert_eq!(failed[0].trace_id, "fail:t2");
        assert!(failed[0].error.as_deref().unwrap().contains("upstream exploded"));

        assert_eq!(sink.0.lock().len(), 4);
        let scores = store.scores_by_job("job-1").await.unwrap();
        assert_eq!(scores.len(), 3);
        assert!(scores.iter().all(|s| s.score == 8.0 && s.parse_tier == ParseTier::Exact));
    }

    #[tokio::test]
    async fn test_missing_config_fails_every_task() {
        let (store, _, executor) = setup(EvalConfig::default()).await;
        let summary = executor
            .execute_batch(vec![task("t1"), task("t2")], "nope", None)
            .await;
        assert_eq!(summary.failed_count, 2);
        assert!(summary.results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("LLM configuration not found"));
        assert!(store.scores_by_job("job-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_is_a_task_failure() {
        let (_, _, executor) = setup(EvalConfig {
            call_timeout_secs: 1,
            ..EvalConfig::default()
        })
        .await;
        let summary = executor
            .execute_batch(vec![task("slow:t1"), task("t2")], "llm-1", None)
            .await;
        assert_eq!(summary.success_count, 1);
        assert_eq!(summary.failed_count, 1);
        let failed = summary.results.iter().find(|r| !r.success).unwrap();
        assert!(failed.error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded_per_provider() {
        let (_, provider, executor) = setup(EvalConfig {
            max_concurrent_per_provider: 2,
            ..EvalConfig::default()
        })
        .await;
        let tasks: Vec<_> = (0..10).map(|i| task(&format!("t{}", i))).collect();
        let summary = executor.execute_batch(tasks, "llm-1", None).await;
        assert_eq!(summary.success_count, 10);
        assert!(provider.peak.load(Ordering::SeqCst) <= 2);
    }
}
