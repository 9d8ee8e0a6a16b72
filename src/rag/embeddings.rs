//! Embedding backends
//!
//! Two wire formats cover the configured deployments: the OpenAI-style
//! `/embeddings` endpoint in its Azure deployment URL form, and Ollama's
//! native `/api/embed`.

use crate::core::credentials::AzureCredential;
use crate::core::error::PluginError;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Request timeout for embedding calls, matching the original pipelines
const EMBED_TIMEOUT_SECS: u64 = 120;

pub enum EmbeddingBackend {
    AzureOpenAi {
        endpoint: String,
        deployment: String,
        api_version: String,
        credential: Arc<AzureCredential>,
    },
    Ollama {
        host: String,
        model: String,
    },
}

/// OpenAI-style embeddings response
#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
}

/// Ollama `/api/embed` response
#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

pub struct EmbeddingClient {
    client: Client,
    backend: EmbeddingBackend,
}

impl EmbeddingClient {
    pub fn new(backend: EmbeddingBackend) -> Result<Self, PluginError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(EMBED_TIMEOUT_SECS))
            .build()
            .map_err(|e| PluginError::Unexpected(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, backend })
    }

    /// Embed a batch of inputs, preserving order
    pub async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, PluginError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        match &self.backend {
            EmbeddingBackend::AzureOpenAi {
                endpoint,
                deployment,
                api_version,
                credential,
            } => {
                let url = format!(
                    "{}/openai/deployments/{}/embeddings?api-version={}",
                    endpoint.trim_end_matches('/'),
                    deployment,
                    api_version
                );
                let builder = self.client.post(&url).json(&json!({ "input": inputs }));
                let builder = credential.apply(builder).await?;
                let response = builder.send().await.map_err(PluginError::from_transport)?;

                let status = response.status();
                if !status.is_success() {
                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    return Err(PluginError::from_status(status.as_u16(), body));
                }

                let parsed: OpenAiEmbeddingResponse = response.json().await.map_err(|e| {
                    PluginError::Unexpected(format!("Failed to parse embeddings: {}", e))
                })?;
                Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
            }
            EmbeddingBackend::Ollama { host, model } => {
                let url = format!("{}/api/embed", host.trim_end_matches('/'));
                let response = self
                    .client
                    .post(&url)
                    .json(&json!({ "model": model, "input": inputs }))
                    .send()
                    .await
                    .map_err(PluginError::from_transport)?;

                let status = response.status();
                if !status.is_success() {
                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    return Err(PluginError::from_status(status.as_u16(), body));
                }

                let parsed: OllamaEmbeddingResponse = response.json().await.map_err(|e| {
                    PluginError::Unexpected(format!("Failed to parse embeddings: {}", e))
                })?;
                Ok(parsed.embeddings)
            }
        }
    }

    /// Embed a single input
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, PluginError> {
        self.embed_batch(std::slice::from_ref(&text.to_string()))
            .await?
            .pop()
            .ok_or_else(|| PluginError::Unexpected("empty embedding response".to_string()))
    }
}
