//! Azure OpenAI manifold pipeline.
//!
//! Exposes one or more Azure OpenAI deployments as selectable models and
//! forwards chat completions to the deployment-scoped endpoint, with
//! parameter filtering, reasoning-model handling and retry with
//! exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::core::constants::{ALLOWED_CHAT_PARAMS, is_reasoning_model};
use crate::core::credentials::{AzureAuthConfig, AzureCredential};
use crate::core::error::PluginError;
use crate::core::llm::sse_line_stream;
use crate::core::plugin::{
    EventSink, ModelIdentity, PipeOutput, Pipeline, merge_valves,
};
use crate::core::retry::RetryPolicy;
use crate::models::chat::ChatRequest;
use crate::pipelines::zip_model_identities;

const DEFAULT_REASONING_MAX_COMPLETION_TOKENS: u64 = 4000;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AzureOpenAiValves {
    /// Resource endpoint, e.g. `https://my-resource.openai.azure.com`.
    pub endpoint: String,
    pub api_version: String,
    /// Semicolon-separated deployment ids.
    pub models: String,
    /// Semicolon-separated display names, positionally matched to `models`.
    pub model_names: String,
    pub auth: AzureAuthConfig,
    /// Retries after the first attempt; only retryable failures count.
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub request_timeout: u64,
    /// Log the outbound payload before dispatch.
    pub debug: bool,
}

impl Default for AzureOpenAiValves {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_version: "2025-01-01-preview".to_string(),
            models: "gpt-4o-mini".to_string(),
            model_names: "GPT-4o Mini".to_string(),
            auth: AzureAuthConfig::default(),
            max_retries: 2,
            retry_base_delay_ms: 1000,
            request_timeout: 90,
            debug: false,
        }
    }
}

pub struct AzureOpenAiPipeline {
    valves: RwLock<AzureOpenAiValves>,
    credential: RwLock<Arc<AzureCredential>>,
    client: Client,
}

impl AzureOpenAiPipeline {
    pub fn new(valves: AzureOpenAiValves) -> Result<Self, PluginError> {
        let credential = Arc::new(valves.auth.build()?);
        let client = Client::builder()
            .timeout(Duration::from_secs(valves.request_timeout))
            .build()
            .map_err(PluginError::from_transport)?;
        Ok(Self {
            valves: RwLock::new(valves),
            credential: RwLock::new(credential),
            client,
        })
    }

    fn chat_url(valves: &AzureOpenAiValves, deployment: &str) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            valves.endpoint.trim_end_matches('/'),
            deployment,
            valves.api_version
        )
    }

    /// One request attempt. A non-success status is classified into the
    /// error taxonomy so the caller can decide whether to retry.
    async fn send(
        &self,
        url: &str,
        payload: &Value,
        streaming: bool,
    ) -> Result<reqwest::Response, PluginError> {
        let credential = self.credential.read().await.clone();
        let request = credential
            .apply(self.client.post(url).json(payload))
            .await?;
        let response = request.send().await.map_err(PluginError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(PluginError::from_status(status.as_u16(), message));
        }
        debug!(url, streaming, "azure openai request accepted");
        Ok(response)
    }

    async fn send_with_retry(
        &self,
        url: &str,
        payload: &Value,
        streaming: bool,
        policy: &RetryPolicy,
        sink: &EventSink,
    ) -> Result<reqwest::Response, PluginError> {
        let mut attempt = 0u32;
        loop {
            match self.send(url, payload, streaming).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && policy.allows_retry(attempt) => {
                    // Stale or revoked tokens fail with 401/403; drop the
                    // cached token so the retry re-acquires a fresh one.
                    if matches!(err, PluginError::Authentication(_)) {
                        self.credential.read().await.invalidate().await;
                    }
                    let delay = policy.delay_for(attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "azure openai request failed, retrying"
                    );
                    sink.status(
                        format!("Retrying after error: {} (attempt {})", err, attempt + 2),
                        false,
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Builds the upstream payload from the inbound body: unsupported keys are
/// dropped, the `user` field is reduced to a plain id, and reasoning models
/// get their streaming and token-limit restrictions applied.
///
/// Returns the payload together with whether the upstream call streams.
fn build_payload(deployment: &str, body: &ChatRequest) -> (Value, bool) {
    let raw = match serde_json::to_value(body) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };

    let mut payload = Map::new();
    let mut dropped: Vec<String> = Vec::new();
    for (key, value) in raw {
        if value.is_null() {
            continue;
        }
        if ALLOWED_CHAT_PARAMS.contains(&key.as_str()) {
            payload.insert(key, value);
        } else {
            dropped.push(key);
        }
    }
    if !dropped.is_empty() {
        debug!(params = ?dropped, "dropped unsupported chat parameters");
    }

    payload.insert("model".to_string(), json!(deployment));

    if let Some(id) = body.user_id() {
        payload.insert("user".to_string(), json!(id));
    } else {
        payload.remove("user");
    }

    let mut streaming = body.stream;
    if is_reasoning_model(deployment) {
        // Reasoning deployments reject streaming and the max_tokens field.
        streaming = false;
        payload.remove("stream");
        let limit = payload
            .remove("max_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_REASONING_MAX_COMPLETION_TOKENS);
        payload
            .entry("max_completion_tokens".to_string())
            .or_insert(json!(limit));
    } else {
        payload.insert("stream".to_string(), json!(streaming));
    }

    (Value::Object(payload), streaming)
}

#[async_trait]
impl Pipeline for AzureOpenAiPipeline {
    fn id(&self) -> &str {
        "azure_openai"
    }

    fn name(&self) -> &str {
        "Azure OpenAI"
    }

    async fn models(&self) -> Vec<ModelIdentity> {
        let valves = self.valves.read().await;
        zip_model_identities(&valves.models, &valves.model_names)
    }

    async fn pipe(
        &self,
        model_id: &str,
        body: &ChatRequest,
        sink: &EventSink,
    ) -> Result<PipeOutput, PluginError> {
        let valves = self.valves.read().await.clone();
        if valves.endpoint.is_empty() {
            return Ok(PipeOutput::Text(
                PluginError::BadRequest("endpoint is not configured".to_string())
                    .user_message(),
            ));
        }

        let (payload, streaming) = build_payload(model_id, body);
        let url = Self::chat_url(&valves, model_id);
        let policy = RetryPolicy::new(valves.max_retries + 1, valves.retry_base_delay_ms);

        if valves.debug {
            info!(deployment = model_id, payload = %payload, "outbound payload");
        }
        info!(deployment = model_id, streaming, "dispatching chat completion");
        let response = match self
            .send_with_retry(&url, &payload, streaming, &policy, sink)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                error!(deployment = model_id, error = %err, "chat completion failed");
                return Ok(PipeOutput::Text(err.user_message()));
            }
        };

        if streaming {
            return Ok(PipeOutput::Stream(sse_line_stream(response)));
        }

        // Hand the full upstream envelope back untouched; the host extracts
        // the text when the caller asked for a plain completion.
        match response.json::<Value>().await {
            Ok(value) => Ok(PipeOutput::Full(value)),
            Err(err) => Ok(PipeOutput::Text(
                PluginError::from_transport(err).user_message(),
            )),
        }
    }

    async fn on_valves_updated(&self, patch: Value) -> Result<(), PluginError> {
        let mut current = {
            let valves = self.valves.read().await;
            serde_json::to_value(&*valves)
                .map_err(|e| PluginError::Unexpected(e.to_string()))?
        };
        merge_valves(&mut current, &patch);
        let next: AzureOpenAiValves = serde_json::from_value(current)
            .map_err(|e| PluginError::BadRequest(format!("invalid valves: {e}")))?;

        let credential = Arc::new(next.auth.build()?);
        *self.credential.write().await = credential;
        *self.valves.write().await = next;
        info!("azure openai valves updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::ChatMessage;

    fn request(model: &str) -> ChatRequest {
        ChatRequest {
            model: model.to_string(),
            messages: vec![ChatMessage::user("hello")],
            stream: true,
            temperature: Some(0.2),
            top_p: None,
            max_tokens: Some(256),
            frequency_penalty: None,
            presence_penalty: None,
            user: None,
            extra: Map::new(),
        }
    }

    #[test]
    fn filters_unsupported_parameters() {
        let mut body = request("gpt-4o");
        body.extra
            .insert("chat_id".to_string(), json!("abc-123"));
        body.extra.insert("seed".to_string(), json!(7));

        let (payload, _) = build_payload("gpt-4o", &body);
        assert!(payload.get("chat_id").is_none());
        assert_eq!(payload["seed"], json!(7));
        assert_eq!(payload["model"], json!("gpt-4o"));
    }

    #[test]
    fn reasoning_model_disables_streaming() {
        let body = request("o1-mini");
        let (payload, streaming) = build_payload("o1-mini", &body);
        assert!(!streaming);
        assert!(payload.get("stream").is_none());
        assert_eq!(payload["max_completion_tokens"], json!(256));
        assert!(payload.get("max_tokens").is_none());
    }

    #[test]
    fn reasoning_model_defaults_completion_budget() {
        let mut body = request("o3");
        body.max_tokens = None;
        let (payload, _) = build_payload("o3", &body);
        assert_eq!(
            payload["max_completion_tokens"],
            json!(DEFAULT_REASONING_MAX_COMPLETION_TOKENS)
        );
    }

    #[test]
    fn user_object_is_reduced_to_id() {
        let mut body = request("gpt-4o");
        body.user = Some(json!({ "id": "user-7", "name": "Dana" }));
        let (payload, _) = build_payload("gpt-4o", &body);
        assert_eq!(payload["user"], json!("user-7"));
    }

    #[test]
    fn chat_url_strips_trailing_slash() {
        let valves = AzureOpenAiValves {
            endpoint: "https://res.openai.azure.com/".to_string(),
            ..Default::default()
        };
        assert_eq!(
            AzureOpenAiPipeline::chat_url(&valves, "gpt-4o"),
            "https://res.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2025-01-01-preview"
        );
    }
}
