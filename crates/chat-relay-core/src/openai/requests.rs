//! Inbound chat-completion request types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One conversation message.
///
/// Only `role` and `content` are interpreted; any other fields a client
/// sends (names, tool ids, content parts) are carried through to the
/// inference backend untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatMessage {
    /// A plain text message.
    pub fn text(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: Value::String(content.into()),
            extra: Map::new(),
        }
    }
}

/// The subset of the chat-completion request the gateway understands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatCompletionRequest {
    /// Translate the sampling fields into the backend option map.
    ///
    /// `max_tokens` becomes the backend's `num_predict`; absent fields are
    /// omitted rather than sent as nulls.
    #[must_use]
    pub fn backend_options(&self) -> Map<String, Value> {
        let mut options = Map::new();
        if let Some(temperature) = self.temperature {
            options.insert("temperature".to_string(), json_f32(temperature));
        }
        if let Some(top_p) = self.top_p {
            options.insert("top_p".to_string(), json_f32(top_p));
        }
        if let Some(max_tokens) = self.max_tokens {
            options.insert("num_predict".to_string(), Value::from(max_tokens));
        }
        options
    }
}

fn json_f32(v: f32) -> Value {
    serde_json::Number::from_f64(f64::from(v))
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
