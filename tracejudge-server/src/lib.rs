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

//! Tracejudge server: Langfuse-compatible trace ingestion plus
//! LLM-as-judge evaluation jobs over HTTP.

pub mod api;
pub mod auth;
pub mod config;
pub mod ingestion;

use anyhow::Result;
use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Extension, Router,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracejudge_core::{
    DatasetStore, EvaluatorStore, JobStore, LlmConfigStore, ScoreStore, TraceStore,
};
use tracejudge_evals::{
    seed_presets, Base64Cipher, CredentialCipher, EvalExecutor, HttpProviderFactory, JobService,
    ProviderFactory,
};
use tracejudge_storage::MemoryStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::{
    create_job, create_score, get_job, get_job_results, get_job_scores, get_job_summary,
    get_public_trace, get_results_summary, health_check, ingest_batch, list_dataset_items,
    list_evaluators, list_jobs, list_public_traces, list_scores, put_dataset_items,
    receive_dify_webhook, upsert_traces, AppState,
};
use auth::{auth_middleware, Authenticators};
use config::{LogFormat, ServerConfig};
use ingestion::{Aggregator, KeyedLocks};

pub const DEFAULT_LOG_FILTER: &str = "tracejudge_server=info,tracejudge_evals=info,tower_http=info";

/// Install the global subscriber
pub fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

/// Wire services over one store implementing every store contract
pub fn build_state<S>(store: Arc<S>, factory: Arc<dyn ProviderFactory>, config: &ServerConfig) -> AppState
where
    S: TraceStore + ScoreStore + JobStore + EvaluatorStore + LlmConfigStore + DatasetStore + 'static,
{
    let executor = Arc::new(EvalExecutor::new(
        store.clone(),
        store.clone(),
        factory,
        config.evaluation.eval_config(),
    ));
    let jobs = Arc::new(JobService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        executor,
    ));

    let trace_locks = Arc::new(KeyedLocks::new());
    AppState {
        traces: store.clone(),
        scores: store.clone(),
        evaluators: store.clone(),
        datasets: store.clone(),
        aggregator: Arc::new(Aggregator::new(
            store,
            trace_locks.clone(),
            config.ingestion.reject_orphan_events,
        )),
        trace_locks,
        jobs,
        max_batch_size: config.ingestion.max_batch_size,
        webhook_secrets: Arc::new(config.auth.webhook_secrets.clone()),
        started_at: Instant::now(),
    }
}

/// Build the application router
pub fn build_router(state: AppState, auth: &Authenticators, enable_cors: bool) -> Router {
    // Langfuse public API, Basic auth
    let public_routes = Router::new()
        .route("/api/public/ingestion", post(ingest_batch))
        .route("/api/public/traces", get(list_public_traces))
        .route("/api/public/traces/:trace_id", get(get_public_trace))
        .route("/api/public/scores", get(list_scores).post(create_score))
        .layer(axum_middleware::from_fn(auth_middleware))
        .layer(Extension(auth.public_api.clone()));

    // Native API, X-API-Key
    let v1_routes = Router::new()
        .route("/api/v1/traces", post(upsert_traces))
        .route("/api/v1/eval-jobs", get(list_jobs).post(create_job))
        .route("/api/v1/eval-jobs/:id", get(get_job))
        .route("/api/v1/eval-jobs/:id/scores", get(get_job_scores))
        .route("/api/v1/eval-jobs/:id/summary", get(get_job_summary))
        .route("/api/v1/eval-jobs/:id/results", get(get_job_results))
        .route("/api/v1/results/summary", get(get_results_summary))
        .route("/api/v1/evaluators", get(list_evaluators))
        .route(
            "/api/v1/datasets/:dataset_id/items",
            get(list_dataset_items).post(put_dataset_items),
        )
        .layer(axum_middleware::from_fn(auth_middleware))
        .layer(Extension(auth.api_key.clone()));

    Router::new()
        .route("/health", get(health_check))
        // Authenticated by signature, not by key
        .route(
            "/api/v1/traces/webhook/:connection_id",
            post(receive_dify_webhook),
        )
        .merge(public_routes)
        .merge(v1_routes)
        .with_state(state)
        .layer(if enable_cors {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            CorsLayer::new()
        })
        .layer(TraceLayer::new_for_http())
}

/// Seed presets and register the configured judge backends
pub async fn bootstrap_store<S>(store: &S, config: &ServerConfig, cipher: &dyn CredentialCipher) -> Result<()>
where
    S: EvaluatorStore + LlmConfigStore,
{
    if config.evaluation.seed_presets {
        seed_presets(store).await?;
    }

    for backend in &config.llm_configs {
        let llm_config = backend.to_llm_config(cipher);
        tracing::info!(
            "Registered LLM config '{}' ({} / {})",
            llm_config.id,
            llm_config.provider,
            llm_config.model_name
        );
        store.put_llm_config(llm_config).await?;
    }
    Ok(())
}

fn spawn_flush_loop(store: Arc<MemoryStore>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let store = store.clone();
            match tokio::task::spawn_blocking(move || store.flush()).await {
                Ok(Ok(true)) => tracing::debug!("Snapshot flushed"),
                Ok(Ok(false)) => {}
                Ok(Err(e)) => tracing::warn!("Snapshot flush failed: {}", e),
                Err(e) => tracing::warn!("Snapshot flush task failed: {}", e),
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

pub async fn run_server(config: ServerConfig) -> Result<()> {
    init_tracing(config.server.log_format);
    config.validate()?;

    let store = if config.storage.snapshot {
        let path = config.storage.snapshot_path();
        tracing::info!("Opening snapshot store at {:?}", path);
        Arc::new(MemoryStore::open(&path)?)
    } else {
        tracing::info!("Snapshot persistence disabled, running in memory");
        Arc::new(MemoryStore::new())
    };

    let cipher = Base64Cipher;
    bootstrap_store(store.as_ref(), &config, &cipher).await?;

    let factory = Arc::new(
        HttpProviderFactory::new(config.evaluation.eval_config().call_timeout())?
            .with_cipher(Arc::new(cipher)),
    );
    let state = build_state(store.clone(), factory, &config);
    let authenticators = Authenticators::from_config(&config.auth);
    if !config.auth.enabled {
        tracing::warn!(
            "Authentication is DISABLED, all requests act on project '{}'",
            config.auth.default_project
        );
    }

    let app = build_router(state, &authenticators, config.server.enable_cors);

    let flush_handle = config.storage.snapshot.then(|| {
        spawn_flush_loop(
            store.clone(),
            Duration::from_secs(config.storage.flush_interval_secs.max(1)),
        )
    });

    let addr = config.socket_addr()?;
    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = flush_handle {
        handle.abort();
    }
    if store.flush()? {
        tracing::info!("Final snapshot written");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracejudge_core::{EvaluatorStore, LlmConfigStore};

    #[test]
    fn test_config_validation() {
        let mut config = ServerConfig::default();
        config.storage.snapshot = false;
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_bootstrap_seeds_presets_and_backends() {
        let store = MemoryStore::new();
        let mut config = ServerConfig::default();
        config.add_openai_default("sk-test".into());

        bootstrap_store(&store, &config, &Base64Cipher).await.unwrap();
        bootstrap_store(&store, &config, &Base64Cipher).await.unwrap();

        assert_eq!(store.list_evaluators("any").await.unwrap().len(), 8);
        let llm = store
            .get_llm_config(config::OPENAI_DEFAULT_CONFIG_ID)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(Base64Cipher.decrypt(&llm.credential_encrypted).unwrap(), "sk-test");
    }
}
