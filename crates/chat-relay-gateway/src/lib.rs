//! Gateway tier of the chat-relay proxy.
//!
//! Exposes the OpenAI-compatible chat surface and hides transient worker
//! unreachability from clients: streamed responses are reconstructed from
//! the worker's durable chunk log via a cursor-based polling loop, so a
//! network blip between the tiers delays frames instead of dropping them.

pub mod client;
pub mod routes;
pub mod streaming;

use crate::client::WorkerClient;
use chat_relay_core::GatewayConfig;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Wire everything up and serve until shutdown.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = GatewayConfig::from_env();
    info!(backend = %config.backend_url, "starting chat-relay gateway");

    let client = WorkerClient::new(config.backend_url.clone());

    let cors_layer = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let state = routes::AppState {
        config: Arc::new(config.clone()),
        client: Arc::new(client),
    };
    let app = routes::build_router(state).layer(cors_layer);

    let addr = format!("0.0.0.0:{}", config.port);
    info!("gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
