//! Outbound chat-completion envelopes and the OpenAI-style error body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Non-streaming response
// ============================================================================

/// The assistant message of a non-streaming response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoiceData {
    pub role: String,
    pub content: String,
}

impl ChatChoiceData {
    /// An assistant text message.
    #[must_use]
    pub fn text(content: String) -> Self {
        Self {
            role: "assistant".to_string(),
            content,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: usize,
    pub message: ChatChoiceData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
}

impl ChatCompletionResponse {
    /// A single-choice completion envelope.
    #[must_use]
    pub fn single(
        id: String,
        created: u64,
        model: String,
        content: String,
        finish_reason: Option<String>,
    ) -> Self {
        Self {
            id,
            object: "chat.completion".to_string(),
            created,
            model,
            choices: vec![ChatChoice {
                index: 0,
                message: ChatChoiceData::text(content),
                finish_reason,
            }],
        }
    }
}

// ============================================================================
// Streaming chunks (deltas)
// ============================================================================

/// Delta content of one streamed frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChoiceDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: usize,
    pub delta: ChoiceDelta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

impl ChatCompletionChunk {
    /// A single-choice chunk frame.
    #[must_use]
    pub fn delta(
        id: String,
        created: u64,
        model: String,
        content: Option<String>,
        finish_reason: Option<String>,
    ) -> Self {
        Self {
            id,
            object: "chat.completion.chunk".to_string(),
            created,
            model,
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChoiceDelta { content },
                finish_reason,
            }],
        }
    }
}

// ============================================================================
// Error envelope
// ============================================================================

/// The OpenAI-style error body: `{"error": {"message", "type", "code"}}`.
///
/// `code` is a number for gateway statuses and the string
/// `rate_limit_exceeded` for the worker's overload signal; SSE error frames
/// carry no code at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<Value>,
}

impl ErrorResponse {
    /// An error body carrying the HTTP status as its numeric code.
    #[must_use]
    pub fn with_status(message: impl Into<String>, status: StatusCode) -> Self {
        Self {
            error: ErrorDetail {
                message: message.into(),
                kind: "server_error".to_string(),
                code: Some(Value::from(status.as_u16())),
            },
        }
    }

    /// The worker overload signal, `code: "rate_limit_exceeded"`.
    #[must_use]
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                message: message.into(),
                kind: "server_error".to_string(),
                code: Some(Value::from("rate_limit_exceeded")),
            },
        }
    }

    /// A codeless body for SSE error frames.
    #[must_use]
    pub fn frame(message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                message: message.into(),
                kind: "server_error".to_string(),
                code: None,
            },
        }
    }

    /// Render as an HTTP response with the given status.
    pub fn to_response(&self, status: StatusCode) -> Response {
        let mut response = Json(self).into_response();
        *response.status_mut() = status;
        response
    }
}
