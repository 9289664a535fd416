//! HTTP client for the worker tier.

use chat_relay_core::job::{JobCreateRequest, JobCreateResponse, JobEventsResponse};
use reqwest::StatusCode;
use std::time::Duration;

/// Fixed per-attempt deadline for event polls. Poll failures are retried by
/// the caller; a hung poll must not stall the loop longer than this.
const POLL_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from worker calls.
#[derive(Debug, Clone)]
pub enum ClientError {
    /// The worker refused the job with its overload signal.
    RateLimited(String),
    /// Any other non-success status.
    Status { code: u16, body: String },
    /// Connection, timeout or decode failure.
    Network(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimited(body) => write!(f, "worker overloaded: {}", body),
            Self::Status { code, body } => write!(f, "worker status {}: {}", code, body),
            Self::Network(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ClientError {}

fn network_error(e: reqwest::Error) -> ClientError {
    if e.is_timeout() {
        ClientError::Network(format!("request timed out: {}", e))
    } else if e.is_connect() {
        ClientError::Network(format!("connection failed: {}", e))
    } else {
        ClientError::Network(format!("request failed: {}", e))
    }
}

/// Thin typed wrapper over the worker HTTP API.
#[derive(Clone)]
pub struct WorkerClient {
    http: reqwest::Client,
    base_url: String,
}

impl WorkerClient {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// `POST /jobs`. A worker 429 becomes [`ClientError::RateLimited`] so
    /// callers can forward the overload signal distinctly.
    pub async fn create_job(
        &self,
        request: &JobCreateRequest,
    ) -> Result<JobCreateResponse, ClientError> {
        let response = self
            .http
            .post(format!("{}/jobs", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::RateLimited(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                code: status.as_u16(),
                body,
            });
        }
        response.json().await.map_err(network_error)
    }

    /// `GET /jobs/{id}/events?from_seq=N`, bounded by the fixed per-attempt
    /// deadline.
    pub async fn poll_events(
        &self,
        job_id: &str,
        from_seq: i64,
    ) -> Result<JobEventsResponse, ClientError> {
        let response = self
            .http
            .get(format!(
                "{}/jobs/{}/events?from_seq={}",
                self.base_url, job_id, from_seq
            ))
            .timeout(POLL_ATTEMPT_TIMEOUT)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                code: status.as_u16(),
                body,
            });
        }
        response.json().await.map_err(network_error)
    }

    /// `GET /stats`, passed through opaquely.
    pub async fn fetch_stats(&self) -> Result<serde_json::Value, ClientError> {
        let response = self
            .http
            .get(format!("{}/stats", self.base_url))
            .timeout(POLL_ATTEMPT_TIMEOUT)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                code: status.as_u16(),
                body,
            });
        }
        response.json().await.map_err(network_error)
    }
}
