//! Azure AI Inference pipeline.
//!
//! Targets the model-agnostic `/chat/completions` route used by Azure AI
//! Foundry serverless deployments. Unlike the Azure OpenAI manifold this
//! endpoint is not deployment-scoped, carries no `user` field and sends an
//! explicit fixed parameter set.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::core::constants::is_reasoning_model;
use crate::core::credentials::{AzureAuthConfig, AzureCredential};
use crate::core::error::PluginError;
use crate::core::llm::sse_line_stream;
use crate::core::plugin::{
    EventSink, ModelIdentity, PipeOutput, Pipeline, merge_valves,
};
use crate::models::chat::ChatRequest;
use crate::pipelines::zip_model_identities;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AzureInferenceValves {
    /// Serverless endpoint, e.g. `https://my-project.services.ai.azure.com/models`.
    pub endpoint: String,
    pub api_version: String,
    /// Semicolon-separated model names advertised to the host and sent upstream.
    pub models: String,
    /// Optional display names, zipped positionally against `models`.
    pub model_names: String,
    pub auth: AzureAuthConfig,
    pub request_timeout: u64,
}

impl Default for AzureInferenceValves {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_version: "2024-05-01-preview".to_string(),
            models: "Phi-4".to_string(),
            model_names: String::new(),
            auth: AzureAuthConfig::default(),
            request_timeout: 90,
        }
    }
}

pub struct AzureInferencePipeline {
    valves: RwLock<AzureInferenceValves>,
    credential: RwLock<Arc<AzureCredential>>,
    client: Client,
}

impl AzureInferencePipeline {
    pub fn new(valves: AzureInferenceValves) -> Result<Self, PluginError> {
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

    fn chat_url(valves: &AzureInferenceValves) -> String {
        format!(
            "{}/chat/completions?api-version={}",
            valves.endpoint.trim_end_matches('/'),
            valves.api_version
        )
    }
}

/// Explicit parameter set; unknown host parameters are not forwarded.
fn build_payload(model: &str, body: &ChatRequest) -> (Value, bool) {
    let streaming = body.stream && !is_reasoning_model(model);
    let payload = json!({
        "model": model,
        "messages": body.messages,
        "stream": streaming,
        "temperature": body.temperature,
        "max_tokens": body.max_tokens,
        "top_p": body.top_p,
        "frequency_penalty": body.frequency_penalty,
        "presence_penalty": body.presence_penalty,
    });
    (payload, streaming)
}

#[async_trait]
impl Pipeline for AzureInferencePipeline {
    fn id(&self) -> &str {
        "azure_inference"
    }

    fn name(&self) -> &str {
        "Azure AI Inference"
    }

    async fn models(&self) -> Vec<ModelIdentity> {
        let valves = self.valves.read().await;
        zip_model_identities(&valves.models, &valves.model_names)
    }

    async fn pipe(
        &self,
        model_id: &str,
        body: &ChatRequest,
        _sink: &EventSink,
    ) -> Result<PipeOutput, PluginError> {
        let valves = self.valves.read().await.clone();
        if valves.endpoint.is_empty() {
            return Ok(PipeOutput::Text(
                PluginError::BadRequest("endpoint is not configured".to_string())
                    .user_message(),
            ));
        }

        let (payload, streaming) = build_payload(model_id, body);
        let url = Self::chat_url(&valves);

        info!(model = model_id, streaming, "dispatching inference request");
        let credential = self.credential.read().await.clone();
        let request = match credential.apply(self.client.post(&url).json(&payload)).await {
            Ok(request) => request,
            Err(err) => return Ok(PipeOutput::Text(err.user_message())),
        };

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                let err = PluginError::from_transport(err);
                error!(model = model_id, error = %err, "inference request failed");
                return Ok(PipeOutput::Text(err.user_message()));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            let err = PluginError::from_status(status.as_u16(), message);
            error!(model = model_id, error = %err, "inference request rejected");
            return Ok(PipeOutput::Text(err.user_message()));
        }

        if streaming {
            return Ok(PipeOutput::Stream(sse_line_stream(response)));
        }

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
        let next: AzureInferenceValves = serde_json::from_value(current)
            .map_err(|e| PluginError::BadRequest(format!("invalid valves: {e}")))?;

        let credential = Arc::new(next.auth.build()?);
        *self.credential.write().await = credential;
        *self.valves.write().await = next;
        info!("azure inference valves updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::ChatMessage;
    use serde_json::Map;

    fn request(stream: bool) -> ChatRequest {
        ChatRequest {
            model: "Phi-4".to_string(),
            messages: vec![ChatMessage::user("hi")],
            stream,
            temperature: Some(0.7),
            top_p: None,
            max_tokens: Some(512),
            frequency_penalty: None,
            presence_penalty: None,
            user: Some(json!({ "id": "u-1" })),
            extra: Map::new(),
        }
    }

    #[test]
    fn payload_carries_fixed_parameter_set() {
        let (payload, streaming) = build_payload("Phi-4", &request(true));
        assert!(streaming);
        assert_eq!(payload["model"], json!("Phi-4"));
        assert_eq!(payload["stream"], json!(true));
        assert_eq!(payload["max_tokens"], json!(512));
        assert!(payload.get("user").is_none());
    }

    #[test]
    fn reasoning_models_never_stream() {
        let (payload, streaming) = build_payload("o1-mini", &request(true));
        assert!(!streaming);
        assert_eq!(payload["stream"], json!(false));
    }

    #[tokio::test]
    async fn models_zip_ids_with_display_names() {
        let pipeline = AzureInferencePipeline::new(AzureInferenceValves {
            models: "Phi-4;DeepSeek-R1".to_string(),
            model_names: "Phi 4".to_string(),
            ..Default::default()
        })
        .unwrap();
        let identities = pipeline.models().await;
        assert_eq!(identities.len(), 2);
        assert_eq!(identities[0].id, "Phi-4");
        assert_eq!(identities[0].name, "Phi 4");
        assert_eq!(identities[1].name, "DeepSeek-R1");
    }

    #[test]
    fn chat_url_includes_api_version() {
        let valves = AzureInferenceValves {
            endpoint: "https://proj.services.ai.azure.com/models/".to_string(),
            ..Default::default()
        };
        assert_eq!(
            AzureInferencePipeline::chat_url(&valves),
            "https://proj.services.ai.azure.com/models/chat/completions?api-version=2024-05-01-preview"
        );
    }
}
