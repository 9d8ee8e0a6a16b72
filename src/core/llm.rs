//! Shared OpenAI-compatible chat client
//!
//! Several plugins need a plain chat completion call of their own: the
//! prompt enhancer, the chart builder, and RAG answer synthesis. This client
//! speaks the OpenAI wire shape against three endpoint forms: a generic
//! `/chat/completions` base URL, an Azure deployment URL, and an Ollama host
//! (whose OpenAI-compatible API lives under `/v1`).

use crate::core::credentials::AzureCredential;
use crate::core::error::PluginError;
use crate::core::plugin::PipeStream;
use crate::models::chat::{ChatCompletion, ChatMessage};
use futures::StreamExt;
use reqwest::Client;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

/// Where chat completions are sent
pub enum ChatEndpoint {
    /// `{base_url}/chat/completions` with optional bearer key
    OpenAiCompat {
        base_url: String,
        api_key: Option<String>,
    },
    /// `{endpoint}/openai/deployments/{deployment}/chat/completions?api-version=...`
    AzureDeployment {
        endpoint: String,
        deployment: String,
        api_version: String,
        credential: Arc<AzureCredential>,
    },
}

impl ChatEndpoint {
    /// Ollama serves the OpenAI-compatible surface under `/v1`
    pub fn ollama(host: &str) -> Self {
        ChatEndpoint::OpenAiCompat {
            base_url: format!("{}/v1", host.trim_end_matches('/')),
            api_key: None,
        }
    }
}

pub struct ChatClient {
    client: Client,
    endpoint: ChatEndpoint,
}

impl ChatClient {
    pub fn new(endpoint: ChatEndpoint, timeout_secs: u64) -> Result<Self, PluginError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| PluginError::Unexpected(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, endpoint })
    }

    fn url(&self) -> String {
        match &self.endpoint {
            ChatEndpoint::OpenAiCompat { base_url, .. } => {
                format!("{}/chat/completions", base_url.trim_end_matches('/'))
            }
            ChatEndpoint::AzureDeployment {
                endpoint,
                deployment,
                api_version,
                ..
            } => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                endpoint.trim_end_matches('/'),
                deployment,
                api_version
            ),
        }
    }

    async fn send(&self, payload: &Value) -> Result<reqwest::Response, PluginError> {
        let mut builder = self
            .client
            .post(self.url())
            .header("Content-Type", "application/json");

        builder = match &self.endpoint {
            ChatEndpoint::OpenAiCompat { api_key, .. } => match api_key {
                Some(key) => builder.bearer_auth(key),
                None => builder,
            },
            ChatEndpoint::AzureDeployment { credential, .. } => {
                credential.apply(builder).await?
            }
        };

        let response = builder
            .json(payload)
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

        Ok(response)
    }

    /// Non-streaming completion returning the first choice content
    pub async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    ) -> Result<String, PluginError> {
        let mut payload = json!({
            "model": model,
            "messages": messages,
            "stream": false,
        });
        if let Some(t) = temperature {
            payload["temperature"] = json!(t);
        }
        if let Some(m) = max_tokens {
            payload["max_tokens"] = json!(m);
        }

        let response = self.send(&payload).await?;
        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| PluginError::Unexpected(format!("Failed to parse response: {}", e)))?;

        completion
            .first_content()
            .filter(|content| !content.is_empty())
            .ok_or_else(|| {
                PluginError::Unexpected("provider returned no completion content".to_string())
            })
    }

    /// Streaming completion: SSE lines from the provider, verbatim
    pub async fn complete_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: Option<f32>,
    ) -> Result<PipeStream, PluginError> {
        let mut payload = json!({
            "model": model,
            "messages": messages,
            "stream": true,
        });
        if let Some(t) = temperature {
            payload["temperature"] = json!(t);
        }

        let response = self.send(&payload).await?;
        Ok(sse_line_stream(response))
    }
}

/// Turn a streaming HTTP response into a line stream of its SSE payload
pub fn sse_line_stream(response: reqwest::Response) -> PipeStream {
    use futures_util::TryStreamExt;
    use tokio::io::AsyncBufReadExt;
    use tokio_stream::wrappers::LinesStream;

    let byte_stream = response
        .bytes_stream()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));

    let reader = tokio_util::io::StreamReader::new(byte_stream);
    let buf_reader = tokio::io::BufReader::new(reader);
    let lines = buf_reader.lines();
    let line_stream = LinesStream::new(lines);

    let stream = line_stream.map(|result: Result<String, std::io::Error>| {
        result.map_err(|e| PluginError::Unexpected(e.to_string()))
    });

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::credentials::AzureAuthConfig;

    #[test]
    fn test_openai_compat_url() {
        let client = ChatClient::new(
            ChatEndpoint::OpenAiCompat {
                base_url: "https://api.example.com/v1/".into(),
                api_key: None,
            },
            30,
        )
        .unwrap();
        assert_eq!(client.url(), "https://api.example.com/v1/chat/completions");
    }

    #[test]
    fn test_azure_deployment_url() {
        let credential = AzureAuthConfig {
            api_key: Some("key".into()),
            ..Default::default()
        }
        .build()
        .unwrap();
        let client = ChatClient::new(
            ChatEndpoint::AzureDeployment {
                endpoint: "https://res.openai.azure.com".into(),
                deployment: "gpt-4o-mini-payg".into(),
                api_version: "2025-01-01-preview".into(),
                credential: Arc::new(credential),
            },
            30,
        )
        .unwrap();
        assert_eq!(
            client.url(),
            "https://res.openai.azure.com/openai/deployments/gpt-4o-mini-payg/chat/completions?api-version=2025-01-01-preview"
        );
    }

    #[test]
    fn test_ollama_endpoint_url() {
        let client = ChatClient::new(ChatEndpoint::ollama("http://ollama:11434"), 30).unwrap();
        assert_eq!(client.url(), "http://ollama:11434/v1/chat/completions");
    }
}
