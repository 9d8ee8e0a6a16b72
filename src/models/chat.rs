//! Chat wire types
//!
//! The host hands every plugin the same OpenAI-style chat completion body.
//! Unknown parameters are preserved in `extra` so provider pipelines can
//! apply their own allowed-parameter filtering before dispatch.

use crate::core::constants::role;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single chat message; content may be a plain string or content blocks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Value,
}

impl ChatMessage {
    pub fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Value::String(content.into()),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(role::SYSTEM, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(role::USER, content)
    }

    /// Flatten the content to plain text (joins text blocks)
    pub fn content_text(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            Value::Array(blocks) => blocks
                .iter()
                .filter_map(|block| {
                    if block.get("type").and_then(|v| v.as_str()) == Some("text") {
                        block.get("text").and_then(|v| v.as_str()).map(str::to_string)
                    } else {
                        None
                    }
                })
                .collect::<Vec<_>>()
                .join("\n"),
            other => other.to_string(),
        }
    }
}

/// The chat request body received from the host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    /// Host user: either an id string or a user object with an `id` field
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
    /// Parameters this crate does not model explicitly
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatRequest {
    /// Last user message content, if any
    pub fn last_user_message(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == role::USER)
            .map(|m| m.content_text())
    }

    /// The host user id, handling both string and object forms
    pub fn user_id(&self) -> Option<String> {
        match &self.user {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Object(obj)) => obj
                .get("id")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .or_else(|| Some(Value::Object(obj.clone()).to_string())),
            _ => None,
        }
    }
}

/// Non-streaming chat completion response (OpenAI wire shape)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<ChatChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    #[serde(default)]
    pub index: u32,
    pub message: ChatMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl ChatCompletion {
    /// Content of the first choice, if the provider returned one
    pub fn first_content(&self) -> Option<String> {
        self.choices.first().map(|c| c.message.content_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_last_user_message_skips_assistant() {
        let request: ChatRequest = serde_json::from_value(json!({
            "model": "gpt-4o-mini",
            "messages": [
                {"role": "user", "content": "first"},
                {"role": "assistant", "content": "reply"},
                {"role": "user", "content": "second"}
            ]
        }))
        .unwrap();
        assert_eq!(request.last_user_message().as_deref(), Some("second"));
    }

    #[test]
    fn test_content_blocks_flatten_to_text() {
        let msg = ChatMessage {
            role: "user".into(),
            content: json!([
                {"type": "text", "text": "hello"},
                {"type": "image_url", "image_url": {"url": "data:..."}},
                {"type": "text", "text": "world"}
            ]),
        };
        assert_eq!(msg.content_text(), "hello\nworld");
    }

    #[test]
    fn test_user_id_from_object() {
        let request: ChatRequest = serde_json::from_value(json!({
            "messages": [],
            "user": {"id": "u-123", "name": "Ada"}
        }))
        .unwrap();
        assert_eq!(request.user_id().as_deref(), Some("u-123"));
    }

    #[test]
    fn test_unknown_params_preserved() {
        let request: ChatRequest = serde_json::from_value(json!({
            "messages": [],
            "seed": 7,
            "chat_id": "abc"
        }))
        .unwrap();
        assert_eq!(request.extra.get("seed"), Some(&json!(7)));
        assert_eq!(request.extra.get("chat_id"), Some(&json!("abc")));
    }
}
