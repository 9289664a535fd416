//! Worker tier of the chat-relay proxy.
//!
//! Owns job lifecycle: admission, bounded-concurrency execution against the
//! inference backend, durable chunk buffering in the shared store, and the
//! HTTP surface the gateway polls.

pub mod admission;
pub mod cancel;
pub mod executor;
pub mod routes;
pub mod store;
pub mod upstream;

use crate::admission::AdmissionController;
use crate::cancel::CancelRegistry;
use crate::executor::{sweep_stale_jobs, Executor, ExecutorPool};
use crate::store::{ChunkStore, RedisStore};
use crate::upstream::UpstreamClient;
use chat_relay_core::WorkerConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Wire everything up and serve until shutdown.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = WorkerConfig::from_env();
    info!(
        concurrency = config.concurrency,
        max_queue = config.max_queue(),
        "starting chat-relay worker"
    );

    let store: Arc<dyn ChunkStore> = Arc::new(RedisStore::connect(&config.redis_url).await?);
    let job_ttl = Duration::from_secs(config.job_ttl_secs);

    // A previous process may have left jobs mid-flight.
    sweep_stale_jobs(&store, job_ttl).await;

    let (admission, rx) = AdmissionController::new(config.concurrency);
    let cancels = CancelRegistry::new();
    let executor = Executor::new(
        store.clone(),
        cancels.clone(),
        UpstreamClient::new(config.ollama_base_url.clone()),
        job_ttl,
    );
    let _pool = ExecutorPool::spawn(config.concurrency, rx, admission.clone(), executor);

    let app = routes::build_router(routes::AppState {
        store,
        admission,
        cancels,
    });

    let addr = format!("0.0.0.0:{}", config.port);
    info!("worker listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
