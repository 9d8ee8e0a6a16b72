//! GitHub repository RAG pipeline.
//!
//! Indexes one GitHub branch into an in-memory vector index at startup and
//! answers chat requests by retrieving the closest chunks and synthesizing
//! a grounded answer with the configured chat model.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::core::constants::is_reasoning_model;
use crate::core::error::PluginError;
use crate::core::plugin::{
    EventSink, ModelIdentity, PipeOutput, Pipeline, merge_valves,
};
use crate::models::chat::ChatRequest;
use crate::rag::github::GithubReader;
use crate::rag::index::{VectorIndex, query_index};
use crate::rag::{RagModelValves, RepoFilters};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GithubRagValves {
    /// Disabled pipelines keep their model identity but never index.
    pub enabled: bool,
    pub access_token: String,
    pub repo_owner: String,
    pub repo_name: String,
    pub repo_branch: String,
    /// Semicolon-separated lists; includes win over excludes
    pub include_extensions: String,
    pub exclude_extensions: String,
    pub include_directories: String,
    pub exclude_directories: String,
    #[serde(flatten)]
    pub model: RagModelValves,
}

impl Default for GithubRagValves {
    fn default() -> Self {
        Self {
            enabled: true,
            access_token: String::new(),
            repo_owner: String::new(),
            repo_name: String::new(),
            repo_branch: "main".to_string(),
            include_extensions: String::new(),
            exclude_extensions: ".png;.jpg;.jpeg;.gif;.svg;.ico;.lock".to_string(),
            include_directories: String::new(),
            exclude_directories: ".git;node_modules;target".to_string(),
            model: RagModelValves::default(),
        }
    }
}

impl GithubRagValves {
    fn filters(&self) -> RepoFilters {
        RepoFilters::from_valves(
            &self.include_extensions,
            &self.exclude_extensions,
            &self.include_directories,
            &self.exclude_directories,
        )
    }

    fn identity(&self) -> String {
        format!("{}:{}:{}", self.repo_owner, self.repo_name, self.repo_branch)
    }
}

pub struct GithubRagPipeline {
    valves: RwLock<GithubRagValves>,
    index: RwLock<Option<VectorIndex>>,
}

impl GithubRagPipeline {
    pub fn new(valves: GithubRagValves) -> Self {
        Self {
            valves: RwLock::new(valves),
            index: RwLock::new(None),
        }
    }

    /// Full rebuild: load the branch, chunk, embed, swap the index in.
    async fn rebuild_index(&self) -> Result<(), PluginError> {
        let valves = self.valves.read().await.clone();
        if !valves.enabled {
            *self.index.write().await = None;
            warn!("github rag disabled, clearing the index");
            return Ok(());
        }
        if valves.repo_owner.is_empty() || valves.repo_name.is_empty() {
            warn!("github rag not configured, skipping index build");
            return Ok(());
        }

        info!(
            repo = %format!("{}/{}", valves.repo_owner, valves.repo_name),
            branch = %valves.repo_branch,
            "building github knowledge base"
        );
        let reader = GithubReader::new(
            &valves.access_token,
            &valves.repo_owner,
            &valves.repo_name,
        )?;
        let documents = reader
            .load_branch(&valves.repo_branch, &valves.filters())
            .await?;
        let embedder = valves.model.embedding_client()?;
        let index = VectorIndex::build(
            &documents,
            &embedder,
            valves.model.chunk_size,
            valves.model.chunk_overlap,
            valves.model.embed_batch_size,
        )
        .await?;

        info!(chunks = index.len(), "github knowledge base ready");
        *self.index.write().await = Some(index);
        Ok(())
    }
}

#[async_trait]
impl Pipeline for GithubRagPipeline {
    fn id(&self) -> &str {
        "github_rag"
    }

    fn name(&self) -> &str {
        "GitHub RAG"
    }

    async fn models(&self) -> Vec<ModelIdentity> {
        let identity = self.valves.read().await.identity();
        vec![ModelIdentity {
            id: identity.clone(),
            name: identity,
        }]
    }

    async fn on_startup(&self) {
        if let Err(e) = self.rebuild_index().await {
            error!("github knowledge base build failed: {}", e);
        }
    }

    async fn pipe(
        &self,
        _model_id: &str,
        body: &ChatRequest,
        sink: &EventSink,
    ) -> Result<PipeOutput, PluginError> {
        let Some(query) = body.last_user_message().filter(|q| !q.trim().is_empty())
        else {
            return Ok(PipeOutput::Text(
                "Error: no user question found in the request".to_string(),
            ));
        };

        let valves = self.valves.read().await.clone();
        sink.status("Searching the repository knowledge base", false);

        let guard = self.index.read().await;
        let Some(index) = guard.as_ref() else {
            return Ok(PipeOutput::Text(
                "Error: knowledge base is not ready yet".to_string(),
            ));
        };

        let embedder = match valves.model.embedding_client() {
            Ok(client) => client,
            Err(err) => return Ok(PipeOutput::Text(err.user_message())),
        };
        let chat = match valves.model.chat_client() {
            Ok(client) => client,
            Err(err) => return Ok(PipeOutput::Text(err.user_message())),
        };
        let model = valves.model.chat_model();
        let streaming = body.stream && !is_reasoning_model(model);

        let output = match query_index(
            index,
            &query,
            &embedder,
            &chat,
            model,
            valves.model.top_k,
            streaming,
        )
        .await
        {
            Ok(output) => output,
            Err(err) => {
                error!("github rag query failed: {}", err);
                PipeOutput::Text(err.user_message())
            }
        };
        sink.status("Done", true);
        Ok(output)
    }

    async fn on_valves_updated(&self, patch: Value) -> Result<(), PluginError> {
        let mut current = {
            let valves = self.valves.read().await;
            serde_json::to_value(&*valves)
                .map_err(|e| PluginError::Unexpected(e.to_string()))?
        };
        merge_valves(&mut current, &patch);
        let next: GithubRagValves = serde_json::from_value(current)
            .map_err(|e| PluginError::BadRequest(format!("invalid valves: {e}")))?;

        *self.valves.write().await = next;
        // Settings changes invalidate the index; rebuild from scratch.
        self.rebuild_index().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_combines_owner_repo_branch() {
        let valves = GithubRagValves {
            repo_owner: "acme".to_string(),
            repo_name: "widgets".to_string(),
            repo_branch: "develop".to_string(),
            ..Default::default()
        };
        assert_eq!(valves.identity(), "acme:widgets:develop");
    }

    #[test]
    fn default_filters_exclude_binary_assets() {
        let filters = GithubRagValves::default().filters();
        assert!(filters.allows("src/lib.rs"));
        assert!(!filters.allows("assets/logo.png"));
        assert!(!filters.allows("node_modules/pkg/index.js"));
    }

    #[tokio::test]
    async fn unbuilt_index_reports_not_ready() {
        let pipeline = GithubRagPipeline::new(GithubRagValves::default());
        let body: ChatRequest =
            serde_json::from_value(serde_json::json!({
                "messages": [{"role": "user", "content": "what does this repo do?"}]
            }))
            .unwrap();
        let output = pipeline
            .pipe("acme:widgets:main", &body, &EventSink::disabled())
            .await
            .unwrap();
        match output {
            PipeOutput::Text(text) => {
                assert_eq!(text, "Error: knowledge base is not ready yet")
            }
            _ => panic!("expected text output"),
        }
    }
}
