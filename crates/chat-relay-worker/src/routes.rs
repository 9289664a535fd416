//! Worker HTTP surface.
//!
//! Handlers are thin: they validate, call into the shared components and
//! serialize. All interesting state lives in the store, the admission
//! controller and the cancellation registry.

use crate::admission::AdmissionController;
use crate::cancel::CancelRegistry;
use crate::store::{ChunkStore, StoreError};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chat_relay_core::job::{
    now_rfc3339, JobCreateRequest, JobCreateResponse, JobEventsResponse, JobMeta, JobStatus,
    JobStatusResponse,
};
use chat_relay_core::openai::responses::ErrorResponse;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Hard cap on chunks returned by one events poll.
const MAX_EVENT_CHUNKS: usize = 1000;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ChunkStore>,
    pub admission: AdmissionController,
    pub cancels: CancelRegistry,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/jobs", post(create_job))
        .route("/jobs/:job_id/events", get(get_events))
        .route("/jobs/:job_id/status", get(get_status))
        .route("/jobs/:job_id/cancel", post(cancel_job))
        .route("/stats", get(get_stats))
        .with_state(state)
}

async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<JobCreateRequest>,
) -> Response {
    let job_id = uuid::Uuid::new_v4().to_string();
    let meta = JobMeta::queued(req.model, req.messages, req.options);

    if let Err(e) = state.store.create_job(&job_id, &meta).await {
        return ErrorResponse::with_status(e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
            .to_response(StatusCode::INTERNAL_SERVER_ERROR);
    }

    if let Err(e) = state.admission.enqueue(job_id.clone()) {
        // The job record already exists; leave a terminal trace behind.
        let _ = state
            .store
            .update_status(
                &job_id,
                JobStatus::Failed,
                Some(&now_rfc3339()),
                Some(&e.to_string()),
            )
            .await;
        warn!(job_id = %job_id, error = %e, "job rejected by admission");
        return ErrorResponse::rate_limited(format!("Service overloaded: {}", e))
            .to_response(StatusCode::TOO_MANY_REQUESTS);
    }

    info!(job_id = %job_id, "job accepted");
    Json(JobCreateResponse {
        job_id,
        status: JobStatus::Queued,
    })
    .into_response()
}

#[derive(Deserialize)]
struct EventsQuery {
    from_seq: Option<i64>,
}

async fn get_events(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Response {
    let from_seq = query.from_seq.unwrap_or(-1);

    let meta = match state.store.get_meta(&job_id).await {
        Ok(meta) => meta,
        Err(e) => return store_error_response(e),
    };
    let chunks = match state
        .store
        .read_chunks(&job_id, from_seq, MAX_EVENT_CHUNKS)
        .await
    {
        Ok(chunks) => chunks,
        Err(e) => return store_error_response(e),
    };

    Json(JobEventsResponse {
        status: meta.status,
        chunks,
    })
    .into_response()
}

async fn get_status(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
    match state.store.get_meta(&job_id).await {
        Ok(meta) => Json(JobStatusResponse {
            status: meta.status,
            created_at: meta.created_at,
            completed_at: meta.completed_at,
            error: meta.error,
        })
        .into_response(),
        Err(e) => store_error_response(e),
    }
}

async fn cancel_job(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
    if let Err(e) = state.store.get_meta(&job_id).await {
        return store_error_response(e);
    }

    state.cancels.cancel(&job_id);
    if let Err(e) = state
        .store
        .update_status(&job_id, JobStatus::Cancelled, Some(&now_rfc3339()), None)
        .await
    {
        return store_error_response(e);
    }

    info!(job_id = %job_id, "job cancelled");
    StatusCode::OK.into_response()
}

async fn get_stats(State(state): State<AppState>) -> Response {
    Json(state.admission.stats()).into_response()
}

fn store_error_response(error: StoreError) -> Response {
    match error {
        StoreError::NotFound(_) => {
            ErrorResponse::with_status("job not found", StatusCode::NOT_FOUND)
                .to_response(StatusCode::NOT_FOUND)
        }
        other => ErrorResponse::with_status(other.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
            .to_response(StatusCode::INTERNAL_SERVER_ERROR),
    }
}
