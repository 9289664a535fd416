//! Gateway loop tests against a scripted worker.
//!
//! The mock worker replays a fixed sequence of poll responses (including
//! hard failures, to simulate an outage window) so the resumable streaming
//! loop and the non-streaming aggregator can be exercised deterministically.

use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chat_relay_core::config::GatewayConfig;
use chat_relay_core::job::{Chunk, JobEventsResponse, JobStatus};
use chat_relay_core::openai::responses::ErrorResponse;
use chat_relay_gateway::client::{ClientError, WorkerClient};
use chat_relay_gateway::routes::{build_router, AppState};
use chat_relay_gateway::streaming::{
    collect_completion, pump_job_stream, AggregateError, StreamEvent,
};
use serde_json::json;
use std::sync::{Arc, Mutex};

/// One scripted answer to an events poll.
#[derive(Clone)]
enum PollScript {
    Events(JobStatus, Vec<Chunk>),
    Fail(u16),
}

/// Spawn a mock worker that replays `polls` in order, repeating the last
/// entry once the script runs out.
async fn spawn_mock_worker(polls: Vec<PollScript>, reject_creates: bool) -> String {
    let cursor = Arc::new(Mutex::new(0usize));
    let polls = Arc::new(polls);

    let app = Router::new()
        .route(
            "/jobs",
            post(move || async move {
                if reject_creates {
                    ErrorResponse::rate_limited("Service overloaded: queue full")
                        .to_response(StatusCode::TOO_MANY_REQUESTS)
                } else {
                    Json(json!({"job_id": "job-1", "status": "queued"})).into_response()
                }
            }),
        )
        .route(
            "/jobs/:job_id/events",
            get(move || {
                let cursor = cursor.clone();
                let polls = polls.clone();
                async move {
                    if polls.is_empty() {
                        return StatusCode::NOT_FOUND.into_response();
                    }
                    let index = {
                        let mut guard = cursor.lock().unwrap();
                        let index = (*guard).min(polls.len() - 1);
                        *guard += 1;
                        index
                    };
                    match &polls[index] {
                        PollScript::Fail(code) => {
                            StatusCode::from_u16(*code).unwrap().into_response()
                        }
                        PollScript::Events(status, chunks) => Json(JobEventsResponse {
                            status: *status,
                            chunks: chunks.clone(),
                        })
                        .into_response(),
                    }
                }
            }),
        )
        .route(
            "/stats",
            get(|| async {
                Json(json!({"active": 1, "queued": 0, "capacity": 10, "max_queue": 20}))
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn test_config(backend_url: &str) -> GatewayConfig {
    GatewayConfig {
        backend_url: backend_url.to_string(),
        poll_interval_ms: 10,
        retry_backoff_init_ms: 20,
        retry_backoff_max_ms: 50,
        job_timeout_ms: 5000,
        ..GatewayConfig::default()
    }
}

fn happy_chunks() -> Vec<Chunk> {
    vec![
        Chunk::content(1, "Hel".to_string()),
        Chunk::content(2, "lo".to_string()),
        Chunk::terminal(3, String::new(), "stop"),
    ]
}

/// Run the streaming pump to completion and collect everything it emits.
async fn run_pump(config: GatewayConfig) -> Vec<StreamEvent> {
    let client = Arc::new(WorkerClient::new(config.backend_url.clone()));
    let (tx, rx) = flume::unbounded();
    tokio::spawn(pump_job_stream(
        client,
        Arc::new(config),
        "job-1".to_string(),
        "test-model".to_string(),
        tx,
    ));
    let mut events = Vec::new();
    while let Ok(event) = rx.recv_async().await {
        events.push(event);
    }
    events
}

fn chunk_contents(events: &[StreamEvent]) -> Vec<Option<String>> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Chunk(chunk) => Some(chunk.choices[0].delta.content.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_streaming_happy_path() {
    let all = happy_chunks();
    let backend = spawn_mock_worker(
        vec![
            PollScript::Events(JobStatus::Running, vec![]),
            PollScript::Events(JobStatus::Running, all[..2].to_vec()),
            PollScript::Events(JobStatus::Running, all.clone()),
        ],
        false,
    )
    .await;

    let events = run_pump(test_config(&backend)).await;

    assert_eq!(
        chunk_contents(&events),
        vec![
            Some("Hel".to_string()),
            Some("lo".to_string()),
            Some(String::new()),
        ]
    );
    // The final content frame carries the finish reason; the stream ends
    // with the [DONE] sentinel.
    let frames: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Chunk(c) => Some(c),
            _ => None,
        })
        .collect();
    assert_eq!(frames[2].choices[0].finish_reason.as_deref(), Some("stop"));
    assert!(frames[0].choices[0].finish_reason.is_none());
    assert!(matches!(events.last(), Some(StreamEvent::Done)));

    // One stable id and created timestamp across all frames.
    assert!(frames.iter().all(|f| f.id == frames[0].id));
    assert!(frames[0].id.starts_with("chatcmpl-"));
    assert!(frames.iter().all(|f| f.created == frames[0].created));
}

#[tokio::test]
async fn test_streaming_survives_worker_outage() {
    let all = happy_chunks();
    let backend = spawn_mock_worker(
        vec![
            PollScript::Events(JobStatus::Running, all[..2].to_vec()),
            PollScript::Fail(500),
            PollScript::Fail(502),
            // Recovery replays the full log; the cursor must drop the
            // already-forwarded prefix.
            PollScript::Events(JobStatus::Running, all.clone()),
        ],
        false,
    )
    .await;

    let events = run_pump(test_config(&backend)).await;

    assert_eq!(
        chunk_contents(&events),
        vec![
            Some("Hel".to_string()),
            Some("lo".to_string()),
            Some(String::new()),
        ]
    );
    assert!(matches!(events.last(), Some(StreamEvent::Done)));
}

#[tokio::test]
async fn test_streaming_replay_is_idempotent() {
    let all = happy_chunks();
    let backend = spawn_mock_worker(
        vec![
            PollScript::Events(JobStatus::Running, all[..1].to_vec()),
            PollScript::Events(JobStatus::Running, all[..2].to_vec()),
            PollScript::Events(JobStatus::Running, all.clone()),
        ],
        false,
    )
    .await;

    let events = run_pump(test_config(&backend)).await;
    // Every poll replayed the whole log so far; each delta still comes
    // through exactly once.
    assert_eq!(chunk_contents(&events).len(), 3);
}

#[tokio::test]
async fn test_streaming_completed_without_done_chunk() {
    let backend = spawn_mock_worker(
        vec![
            PollScript::Events(
                JobStatus::Running,
                vec![Chunk::content(1, "partial".to_string())],
            ),
            PollScript::Events(JobStatus::Completed, vec![]),
        ],
        false,
    )
    .await;

    let events = run_pump(test_config(&backend)).await;
    assert_eq!(chunk_contents(&events), vec![Some("partial".to_string())]);
    assert!(matches!(events.last(), Some(StreamEvent::Done)));
}

#[tokio::test]
async fn test_streaming_surfaces_job_failure() {
    let backend = spawn_mock_worker(
        vec![PollScript::Events(JobStatus::Failed, vec![])],
        false,
    )
    .await;

    let events = run_pump(test_config(&backend)).await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        StreamEvent::Error(message) => assert_eq!(message, "job failed"),
        other => panic!("expected error frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_streaming_surfaces_error_chunk() {
    let backend = spawn_mock_worker(
        vec![PollScript::Events(
            JobStatus::Running,
            vec![Chunk::failure(1, "cancelled")],
        )],
        false,
    )
    .await;

    let events = run_pump(test_config(&backend)).await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        StreamEvent::Error(message) => assert_eq!(message, "cancelled"),
        other => panic!("expected error frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_streaming_overall_timeout() {
    let backend = spawn_mock_worker(
        vec![PollScript::Events(JobStatus::Running, vec![])],
        false,
    )
    .await;

    let mut config = test_config(&backend);
    config.job_timeout_ms = 150;
    let events = run_pump(config).await;

    match events.last() {
        Some(StreamEvent::Error(message)) => assert_eq!(message, "timeout exceeded"),
        other => panic!("expected timeout frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_non_streaming_aggregation() {
    let backend = spawn_mock_worker(
        vec![
            PollScript::Events(JobStatus::Running, happy_chunks()),
            PollScript::Events(JobStatus::Completed, happy_chunks()),
        ],
        false,
    )
    .await;

    let config = Arc::new(test_config(&backend));
    let client = Arc::new(WorkerClient::new(config.backend_url.clone()));
    let completion = collect_completion(
        client,
        config,
        "job-1".to_string(),
        "test-model".to_string(),
    )
    .await
    .unwrap();

    assert_eq!(completion.object, "chat.completion");
    assert_eq!(completion.choices[0].message.content, "Hello");
    assert_eq!(completion.choices[0].finish_reason.as_deref(), Some("stop"));
    assert_eq!(completion.model, "test-model");
}

#[tokio::test]
async fn test_non_streaming_failure_and_timeout() {
    let failed = spawn_mock_worker(
        vec![PollScript::Events(JobStatus::Cancelled, vec![])],
        false,
    )
    .await;
    let config = Arc::new(test_config(&failed));
    let client = Arc::new(WorkerClient::new(config.backend_url.clone()));
    let err = collect_completion(client, config, "job-1".to_string(), "m".to_string())
        .await
        .unwrap_err();
    assert_eq!(err, AggregateError::Failed("job cancelled".to_string()));

    let stuck = spawn_mock_worker(
        vec![PollScript::Events(JobStatus::Running, vec![])],
        false,
    )
    .await;
    let mut config = test_config(&stuck);
    config.job_timeout_ms = 150;
    let config = Arc::new(config);
    let client = Arc::new(WorkerClient::new(config.backend_url.clone()));
    let err = collect_completion(client, config, "job-1".to_string(), "m".to_string())
        .await
        .unwrap_err();
    assert_eq!(err, AggregateError::Timeout);
}

#[tokio::test]
async fn test_overload_is_distinct_client_error() {
    let backend = spawn_mock_worker(vec![], true).await;
    let client = WorkerClient::new(backend);
    let err = client
        .create_job(&chat_relay_core::job::JobCreateRequest {
            model: "m".to_string(),
            messages: vec![],
            options: serde_json::Map::new(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::RateLimited(_)));
}

// ============================================================================
// Full-router tests
// ============================================================================

async fn spawn_gateway(config: GatewayConfig) -> String {
    let client = WorkerClient::new(config.backend_url.clone());
    let app = build_router(AppState {
        config: Arc::new(config),
        client: Arc::new(client),
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_sse_wire_format_end_to_end() {
    let all = happy_chunks();
    let backend = spawn_mock_worker(
        vec![PollScript::Events(JobStatus::Running, all)],
        false,
    )
    .await;
    let gateway = spawn_gateway(test_config(&backend)).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", gateway))
        .json(&json!({
            "model": "test-model",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true,
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"));
    assert_eq!(
        response.headers().get("x-accel-buffering").unwrap(),
        "no"
    );

    let body = response.text().await.unwrap();
    let payloads: Vec<&str> = body
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .collect();

    assert_eq!(payloads.len(), 4);
    let first: serde_json::Value = serde_json::from_str(payloads[0]).unwrap();
    assert_eq!(first["object"], "chat.completion.chunk");
    assert_eq!(first["choices"][0]["delta"]["content"], "Hel");
    let third: serde_json::Value = serde_json::from_str(payloads[2]).unwrap();
    assert_eq!(third["choices"][0]["finish_reason"], "stop");
    assert_eq!(payloads[3], "[DONE]");
}

#[tokio::test]
async fn test_router_forwards_overload_as_429() {
    let backend = spawn_mock_worker(vec![], true).await;
    let gateway = spawn_gateway(test_config(&backend)).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", gateway))
        .json(&json!({
            "model": "test-model",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], 429);
    assert_eq!(body["error"]["type"], "server_error");
}

#[tokio::test]
async fn test_router_auth_and_ambient_endpoints() {
    let backend = spawn_mock_worker(vec![], false).await;
    let mut config = test_config(&backend);
    config.api_key_required = true;
    config.api_key = Some("secret".to_string());
    let gateway = spawn_gateway(config).await;

    let response = reqwest::get(format!("{}/v1/models", gateway)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/v1/models", gateway))
        .bearer_auth("secret")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["object"], "list");
    assert_eq!(body["data"][0]["owned_by"], "ollama");

    let response = client
        .get(format!("{}/v1/stats", gateway))
        .bearer_auth("secret")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let stats: serde_json::Value = response.json().await.unwrap();
    assert_eq!(stats["capacity"], 10);

    // Health stays open regardless of auth.
    let response = reqwest::get(format!("{}/health", gateway)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "OK");
}
