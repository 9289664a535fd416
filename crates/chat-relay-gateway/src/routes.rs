//! Gateway HTTP surface.

use crate::client::{ClientError, WorkerClient};
use crate::streaming::{collect_completion, pump_job_stream, AggregateError, StreamEvent, Streamer};
use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::sse::{KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chat_relay_core::config::GatewayConfig;
use chat_relay_core::job::JobCreateRequest;
use chat_relay_core::openai::created_time_secs;
use chat_relay_core::openai::requests::ChatCompletionRequest;
use chat_relay_core::openai::responses::{ChatCompletionResponse, ErrorResponse};
use serde_json::json;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub client: Arc<WorkerClient>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(models))
        .route("/v1/stats", get(stats))
        .route("/health", get(health))
        .with_state(state)
}

// ============================================================================
// Chat responder
// ============================================================================

/// Every way the chat endpoint can answer.
pub enum ChatResponder {
    Streamer(Sse<Streamer>),
    Completion(ChatCompletionResponse),
    Unauthorized(String),
    Overloaded(String),
    InternalError(String),
    Timeout(String),
}

impl IntoResponse for ChatResponder {
    fn into_response(self) -> Response {
        match self {
            ChatResponder::Streamer(sse) => {
                let mut response = sse.into_response();
                let headers = response.headers_mut();
                headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
                // Reverse proxies must not buffer the event stream.
                headers.insert("X-Accel-Buffering", HeaderValue::from_static("no"));
                response
            }
            ChatResponder::Completion(completion) => Json(completion).into_response(),
            ChatResponder::Unauthorized(message) => {
                ErrorResponse::with_status(message, StatusCode::UNAUTHORIZED)
                    .to_response(StatusCode::UNAUTHORIZED)
            }
            ChatResponder::Overloaded(message) => {
                ErrorResponse::with_status(message, StatusCode::TOO_MANY_REQUESTS)
                    .to_response(StatusCode::TOO_MANY_REQUESTS)
            }
            ChatResponder::InternalError(message) => {
                ErrorResponse::with_status(message, StatusCode::INTERNAL_SERVER_ERROR)
                    .to_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
            ChatResponder::Timeout(message) => {
                ErrorResponse::with_status(message, StatusCode::GATEWAY_TIMEOUT)
                    .to_response(StatusCode::GATEWAY_TIMEOUT)
            }
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatCompletionRequest>,
) -> ChatResponder {
    if let Err(message) = authorize(&state.config, &headers) {
        return ChatResponder::Unauthorized(message);
    }

    let job_request = JobCreateRequest {
        model: request.model.clone(),
        messages: request
            .messages
            .iter()
            .map(|m| serde_json::to_value(m).unwrap_or(serde_json::Value::Null))
            .collect(),
        options: request.backend_options(),
    };

    let created = match state.client.create_job(&job_request).await {
        Ok(created) => created,
        Err(ClientError::RateLimited(body)) => {
            info!(model = %request.model, body = %body, "worker rejected job");
            return ChatResponder::Overloaded(
                "Service overloaded. Please try again later.".to_string(),
            );
        }
        Err(e) => {
            error!(error = %e, "job creation failed");
            return ChatResponder::InternalError(format!("failed to create job: {}", e));
        }
    };

    info!(job_id = %created.job_id, model = %request.model, stream = request.stream, "job created");

    if request.stream {
        let (tx, rx) = flume::bounded::<StreamEvent>(32);
        tokio::spawn(pump_job_stream(
            state.client.clone(),
            state.config.clone(),
            created.job_id,
            request.model.clone(),
            tx,
        ));
        ChatResponder::Streamer(
            Sse::new(Streamer::new(rx)).keep_alive(
                KeepAlive::new().interval(Duration::from_millis(
                    env::var("KEEP_ALIVE_INTERVAL")
                        .map(|val| val.parse::<u64>().unwrap_or(100))
                        .unwrap_or(100),
                )),
            ),
        )
    } else {
        match collect_completion(
            state.client.clone(),
            state.config.clone(),
            created.job_id,
            request.model.clone(),
        )
        .await
        {
            Ok(completion) => ChatResponder::Completion(completion),
            Err(AggregateError::Timeout) => {
                ChatResponder::Timeout("timeout exceeded".to_string())
            }
            Err(AggregateError::Failed(message)) => ChatResponder::InternalError(message),
        }
    }
}

async fn models(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(message) = authorize(&state.config, &headers) {
        return ChatResponder::Unauthorized(message).into_response();
    }

    let created = created_time_secs();
    let data: Vec<_> = state
        .config
        .models
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "object": "model",
                "created": created,
                "owned_by": "ollama",
            })
        })
        .collect();
    Json(json!({ "object": "list", "data": data })).into_response()
}

async fn stats(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(message) = authorize(&state.config, &headers) {
        return ChatResponder::Unauthorized(message).into_response();
    }

    match state.client.fetch_stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(ClientError::Status { .. }) => {
            ErrorResponse::with_status("backend stats unavailable", StatusCode::SERVICE_UNAVAILABLE)
                .to_response(StatusCode::SERVICE_UNAVAILABLE)
        }
        Err(e) => ErrorResponse::with_status(
            format!("failed to get backend stats: {}", e),
            StatusCode::INTERNAL_SERVER_ERROR,
        )
        .to_response(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

async fn health() -> &'static str {
    "OK"
}

/// Shared-secret bearer check; a no-op unless enabled by configuration.
fn authorize(config: &GatewayConfig, headers: &HeaderMap) -> Result<(), String> {
    if !config.api_key_required {
        return Ok(());
    }

    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if header.is_empty() {
        return Err("missing authorization header".to_string());
    }

    let token = header.strip_prefix("Bearer ").unwrap_or(header);
    if config.api_key.as_deref() != Some(token) {
        return Err("invalid api key".to_string());
    }
    Ok(())
}
