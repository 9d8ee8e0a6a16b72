pub mod chart_builder;
pub mod prompt_enhancer;

use crate::core::credentials::AzureAuthConfig;
use crate::core::error::PluginError;
use crate::core::llm::{ChatClient, ChatEndpoint};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Chat backend settings shared by the filter plugins: an Azure OpenAI
/// deployment when configured, otherwise Ollama.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FilterModelValves {
    pub ollama_host: String,
    pub model: String,
    pub azure_endpoint: Option<String>,
    pub azure_deployment: Option<String>,
    pub azure_api_key: Option<String>,
    pub azure_api_version: String,
    pub request_timeout: u64,
}

impl Default for FilterModelValves {
    fn default() -> Self {
        Self {
            ollama_host: "http://ollama:11434".to_string(),
            model: "gpt-4o-mini".to_string(),
            azure_endpoint: None,
            azure_deployment: None,
            azure_api_key: None,
            azure_api_version: "2025-01-01-preview".to_string(),
            request_timeout: 120,
        }
    }
}

impl FilterModelValves {
    pub fn chat_client(&self) -> Result<ChatClient, PluginError> {
        match (&self.azure_endpoint, &self.azure_deployment) {
            (Some(endpoint), Some(deployment)) if !endpoint.is_empty() => {
                let auth = AzureAuthConfig {
                    api_key: self.azure_api_key.clone(),
                    ..Default::default()
                };
                ChatClient::new(
                    ChatEndpoint::AzureDeployment {
                        endpoint: endpoint.clone(),
                        deployment: deployment.clone(),
                        api_version: self.azure_api_version.clone(),
                        credential: Arc::new(auth.build()?),
                    },
                    self.request_timeout,
                )
            }
            _ => ChatClient::new(
                ChatEndpoint::ollama(&self.ollama_host),
                self.request_timeout,
            ),
        }
    }

    pub fn chat_model(&self) -> &str {
        match (&self.azure_endpoint, &self.azure_deployment) {
            (Some(endpoint), Some(deployment)) if !endpoint.is_empty() => deployment,
            _ => &self.model,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn azure_deployment_overrides_ollama_model() {
        let valves = FilterModelValves {
            azure_endpoint: Some("https://res.openai.azure.com".to_string()),
            azure_deployment: Some("gpt-4o".to_string()),
            azure_api_key: Some("key".to_string()),
            ..Default::default()
        };
        assert_eq!(valves.chat_model(), "gpt-4o");
        assert_eq!(FilterModelValves::default().chat_model(), "gpt-4o-mini");
    }
}
