//! Retrieval-augmented-generation machinery shared by the RAG pipelines

pub mod embeddings;
pub mod github;
pub mod gitlab;
pub mod index;

use crate::core::credentials::AzureAuthConfig;
use crate::core::error::PluginError;
use crate::core::llm::{ChatClient, ChatEndpoint};
use embeddings::{EmbeddingBackend, EmbeddingClient};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Chat timeout for answer synthesis, matching the original pipelines
const SYNTHESIS_TIMEOUT_SECS: u64 = 300;

fn default_ollama_host() -> String {
    "http://ollama:11434".to_string()
}

fn default_embed_model() -> String {
    "text-embedding-3-large".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_version() -> String {
    "2025-01-01-preview".to_string()
}

fn default_top_k() -> usize {
    4
}

fn default_chunk_size() -> usize {
    1024
}

fn default_chunk_overlap() -> usize {
    128
}

fn default_embed_batch_size() -> usize {
    16
}

/// Model settings shared by the RAG pipelines: an Azure OpenAI endpoint when
/// configured, otherwise Ollama for both chat and embeddings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RagModelValves {
    pub ollama_host: String,
    /// Ollama model names (chat and embedding)
    pub model: String,
    pub embed_model: String,

    /// Blank Azure endpoint enables the Ollama backends
    pub azure_endpoint: Option<String>,
    pub azure_api_version: String,
    /// Chat deployment name
    pub azure_deployment: Option<String>,
    /// Embedding deployment name
    pub azure_embed_deployment: Option<String>,
    pub azure_api_key: Option<String>,

    pub top_k: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embed_batch_size: usize,
}

impl Default for RagModelValves {
    fn default() -> Self {
        Self {
            ollama_host: default_ollama_host(),
            model: default_chat_model(),
            embed_model: default_embed_model(),
            azure_endpoint: None,
            azure_api_version: default_api_version(),
            azure_deployment: None,
            azure_embed_deployment: None,
            azure_api_key: None,
            top_k: default_top_k(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            embed_batch_size: default_embed_batch_size(),
        }
    }
}

impl RagModelValves {
    fn azure_credential(&self) -> Result<Arc<crate::core::credentials::AzureCredential>, PluginError> {
        let auth = AzureAuthConfig {
            api_key: self.azure_api_key.clone(),
            ..Default::default()
        };
        Ok(Arc::new(auth.build()?))
    }

    /// Chat client for answer synthesis
    pub fn chat_client(&self) -> Result<ChatClient, PluginError> {
        match (&self.azure_endpoint, &self.azure_deployment) {
            (Some(endpoint), Some(deployment)) if !endpoint.is_empty() => ChatClient::new(
                ChatEndpoint::AzureDeployment {
                    endpoint: endpoint.clone(),
                    deployment: deployment.clone(),
                    api_version: self.azure_api_version.clone(),
                    credential: self.azure_credential()?,
                },
                SYNTHESIS_TIMEOUT_SECS,
            ),
            _ => ChatClient::new(ChatEndpoint::ollama(&self.ollama_host), SYNTHESIS_TIMEOUT_SECS),
        }
    }

    /// Embedding client for index builds and query embedding
    pub fn embedding_client(&self) -> Result<EmbeddingClient, PluginError> {
        match (&self.azure_endpoint, &self.azure_embed_deployment) {
            (Some(endpoint), Some(deployment)) if !endpoint.is_empty() => {
                EmbeddingClient::new(EmbeddingBackend::AzureOpenAi {
                    endpoint: endpoint.clone(),
                    deployment: deployment.clone(),
                    api_version: self.azure_api_version.clone(),
                    credential: self.azure_credential()?,
                })
            }
            _ => EmbeddingClient::new(EmbeddingBackend::Ollama {
                host: self.ollama_host.clone(),
                model: self.embed_model.clone(),
            }),
        }
    }

    /// Model id sent on chat requests (deployment name under Azure)
    pub fn chat_model(&self) -> &str {
        match (&self.azure_endpoint, &self.azure_deployment) {
            (Some(endpoint), Some(deployment)) if !endpoint.is_empty() => deployment,
            _ => &self.model,
        }
    }
}

/// Include/exclude filters over repository paths, parsed from the
/// semicolon-separated valve strings. An include list wins over the
/// corresponding exclude list when both are set.
#[derive(Debug, Clone, Default)]
pub struct RepoFilters {
    include_extensions: Vec<String>,
    exclude_extensions: Vec<String>,
    include_directories: Vec<String>,
    exclude_directories: Vec<String>,
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl RepoFilters {
    pub fn from_valves(
        include_extensions: &str,
        exclude_extensions: &str,
        include_directories: &str,
        exclude_directories: &str,
    ) -> Self {
        Self {
            include_extensions: split_list(include_extensions),
            exclude_extensions: split_list(exclude_extensions),
            include_directories: split_list(include_directories),
            exclude_directories: split_list(exclude_directories),
        }
    }

    pub fn allows(&self, path: &str) -> bool {
        let extension_ok = if !self.include_extensions.is_empty() {
            self.include_extensions.iter().any(|ext| path.ends_with(ext))
        } else {
            !self.exclude_extensions.iter().any(|ext| path.ends_with(ext))
        };
        if !extension_ok {
            return false;
        }

        let in_dir = |dir: &String| {
            let dir = dir.trim_matches('/');
            path == dir || path.starts_with(&format!("{}/", dir))
        };
        if !self.include_directories.is_empty() {
            self.include_directories.iter().any(in_dir)
        } else {
            !self.exclude_directories.iter().any(in_dir)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclude_extensions_default_behavior() {
        let filters = RepoFilters::from_valves("", ".png;.jpg;.ipynb", "", "");
        assert!(filters.allows("src/main.rs"));
        assert!(!filters.allows("docs/logo.png"));
        assert!(!filters.allows("notebooks/demo.ipynb"));
    }

    #[test]
    fn test_include_extensions_win_over_exclusions() {
        let filters = RepoFilters::from_valves(".rs", ".rs", "", "");
        assert!(filters.allows("src/lib.rs"));
        assert!(!filters.allows("README.md"));
    }

    #[test]
    fn test_directory_filters() {
        let filters = RepoFilters::from_valves("", "", "src;docs", "");
        assert!(filters.allows("src/main.rs"));
        assert!(filters.allows("docs/intro.md"));
        assert!(!filters.allows("srcx/main.rs"));
        assert!(!filters.allows("tests/it.rs"));

        let exclude = RepoFilters::from_valves("", "", "", "target");
        assert!(exclude.allows("src/main.rs"));
        assert!(!exclude.allows("target/debug/build.rs"));
    }

    #[test]
    fn test_chat_model_prefers_azure_deployment() {
        let mut valves = RagModelValves::default();
        assert_eq!(valves.chat_model(), "gpt-4o-mini");
        valves.azure_endpoint = Some("https://res.openai.azure.com".into());
        valves.azure_deployment = Some("gpt-4o-mini-payg".into());
        assert_eq!(valves.chat_model(), "gpt-4o-mini-payg");
    }
}
