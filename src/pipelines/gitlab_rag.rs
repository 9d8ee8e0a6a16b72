//! GitLab repository RAG pipeline.
//!
//! A manifold over several GitLab project/path/ref triples, each indexed into
//! its own in-memory vector index. Optionally folds project issues into the
//! knowledge base alongside repository files.

use std::collections::HashMap;

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
use crate::rag::gitlab::GitlabReader;
use crate::rag::index::{VectorIndex, query_index};
use crate::rag::{RagModelValves, RepoFilters};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GitlabRagValves {
    pub gitlab_url: String,
    pub access_token: String,
    /// Semicolon-separated, positionally matched lists. A length mismatch
    /// disables the pipeline rather than guessing at pairings.
    pub projects: String,
    pub paths: String,
    pub refs: String,
    pub include_issues: bool,
    pub include_extensions: String,
    pub exclude_extensions: String,
    pub include_directories: String,
    pub exclude_directories: String,
    #[serde(flatten)]
    pub model: RagModelValves,
}

impl Default for GitlabRagValves {
    fn default() -> Self {
        Self {
            gitlab_url: "https://gitlab.com".to_string(),
            access_token: String::new(),
            projects: String::new(),
            paths: String::new(),
            refs: String::new(),
            include_issues: false,
            include_extensions: String::new(),
            exclude_extensions: ".png;.jpg;.jpeg;.gif;.svg;.ico;.lock".to_string(),
            include_directories: String::new(),
            exclude_directories: ".git;node_modules;target".to_string(),
            model: RagModelValves::default(),
        }
    }
}

/// One indexed knowledge base: a project path plus a subtree and a git ref.
#[derive(Debug, Clone, PartialEq)]
struct RepoTarget {
    project: String,
    path: String,
    git_ref: String,
}

impl RepoTarget {
    /// Model ids cannot carry `/`, so path separators become `__`.
    fn model_id(&self) -> String {
        format!("{}:{}:{}", self.project, self.path, self.git_ref).replace('/', "__")
    }

    fn display_name(&self) -> String {
        if self.path.is_empty() {
            format!("{} @ {}", self.project, self.git_ref)
        } else {
            format!("{}/{} @ {}", self.project, self.path, self.git_ref)
        }
    }
}

/// Parses the three positional valve lists. Returns None on a length
/// mismatch, which the manifold surfaces as a single NULL model.
fn parse_targets(valves: &GitlabRagValves) -> Option<Vec<RepoTarget>> {
    let projects: Vec<&str> = valves
        .projects
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if projects.is_empty() {
        return Some(Vec::new());
    }

    let split_aligned = |raw: &str| -> Vec<String> {
        raw.split(';').map(|s| s.trim().to_string()).collect()
    };
    let paths = if valves.paths.trim().is_empty() {
        vec![String::new(); projects.len()]
    } else {
        split_aligned(&valves.paths)
    };
    let refs = if valves.refs.trim().is_empty() {
        vec!["main".to_string(); projects.len()]
    } else {
        split_aligned(&valves.refs)
    };

    if paths.len() != projects.len() || refs.len() != projects.len() {
        return None;
    }

    Some(
        projects
            .into_iter()
            .zip(paths)
            .zip(refs)
            .map(|((project, path), git_ref)| RepoTarget {
                project: project.to_string(),
                path,
                git_ref: if git_ref.is_empty() {
                    "main".to_string()
                } else {
                    git_ref
                },
            })
            .collect(),
    )
}

pub struct GitlabRagPipeline {
    valves: RwLock<GitlabRagValves>,
    indexes: RwLock<HashMap<String, VectorIndex>>,
}

impl GitlabRagPipeline {
    pub fn new(valves: GitlabRagValves) -> Self {
        Self {
            valves: RwLock::new(valves),
            indexes: RwLock::new(HashMap::new()),
        }
    }

    async fn build_target(
        reader: &GitlabReader,
        target: &RepoTarget,
        valves: &GitlabRagValves,
        filters: &RepoFilters,
    ) -> Result<VectorIndex, PluginError> {
        let project_id = reader.project_id(&target.project).await?;
        let mut documents = reader
            .load_tree(project_id, &target.path, &target.git_ref, filters)
            .await?;
        if valves.include_issues {
            match reader.load_issues(project_id).await {
                Ok(mut issues) => documents.append(&mut issues),
                Err(e) => warn!("failed to load issues for {}: {}", target.project, e),
            }
        }
        let embedder = valves.model.embedding_client()?;
        VectorIndex::build(
            &documents,
            &embedder,
            valves.model.chunk_size,
            valves.model.chunk_overlap,
            valves.model.embed_batch_size,
        )
        .await
    }

    async fn rebuild_indexes(&self) -> Result<(), PluginError> {
        let valves = self.valves.read().await.clone();
        let Some(targets) = parse_targets(&valves) else {
            error!("gitlab rag valve lists have mismatched lengths");
            self.indexes.write().await.clear();
            return Ok(());
        };
        if targets.is_empty() {
            warn!("gitlab rag not configured, skipping index build");
            return Ok(());
        }

        let reader = GitlabReader::new(&valves.gitlab_url, &valves.access_token)?;
        let filters = RepoFilters::from_valves(
            &valves.include_extensions,
            &valves.exclude_extensions,
            &valves.include_directories,
            &valves.exclude_directories,
        );

        let mut indexes = HashMap::new();
        for target in &targets {
            info!(target = %target.display_name(), "building gitlab knowledge base");
            match Self::build_target(&reader, target, &valves, &filters).await {
                Ok(index) => {
                    info!(
                        target = %target.display_name(),
                        chunks = index.len(),
                        "gitlab knowledge base ready"
                    );
                    indexes.insert(target.model_id(), index);
                }
                Err(e) => error!("index build failed for {}: {}", target.display_name(), e),
            }
        }
        *self.indexes.write().await = indexes;
        Ok(())
    }
}

#[async_trait]
impl Pipeline for GitlabRagPipeline {
    fn id(&self) -> &str {
        "gitlab_rag"
    }

    fn name(&self) -> &str {
        "GitLab RAG"
    }

    async fn models(&self) -> Vec<ModelIdentity> {
        let valves = self.valves.read().await;
        match parse_targets(&valves) {
            Some(targets) => targets
                .iter()
                .map(|t| ModelIdentity {
                    id: t.model_id(),
                    name: t.display_name(),
                })
                .collect(),
            // Misconfiguration stays visible in the model list.
            None => vec![ModelIdentity {
                id: "NULL".to_string(),
                name: "GitLab RAG (misconfigured: list lengths differ)".to_string(),
            }],
        }
    }

    async fn on_startup(&self) {
        if let Err(e) = self.rebuild_indexes().await {
            error!("gitlab knowledge base build failed: {}", e);
        }
    }

    async fn pipe(
        &self,
        model_id: &str,
        body: &ChatRequest,
        sink: &EventSink,
    ) -> Result<PipeOutput, PluginError> {
        if model_id == "NULL" {
            return Ok(PipeOutput::Text(
                "Error: pipeline is misconfigured, project/path/ref lists differ in length"
                    .to_string(),
            ));
        }
        let Some(query) = body.last_user_message().filter(|q| !q.trim().is_empty())
        else {
            return Ok(PipeOutput::Text(
                "Error: no user question found in the request".to_string(),
            ));
        };

        let valves = self.valves.read().await.clone();
        sink.status("Searching the project knowledge base", false);

        let guard = self.indexes.read().await;
        let Some(index) = guard.get(model_id) else {
            return Ok(PipeOutput::Text(format!(
                "Error: no knowledge base for model {model_id}"
            )));
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
                error!("gitlab rag query failed: {}", err);
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
        let next: GitlabRagValves = serde_json::from_value(current)
            .map_err(|e| PluginError::BadRequest(format!("invalid valves: {e}")))?;

        *self.valves.write().await = next;
        self.rebuild_indexes().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_pair_positionally() {
        let valves = GitlabRagValves {
            projects: "group/app;group/lib".to_string(),
            paths: "src;".to_string(),
            refs: "main;v2".to_string(),
            ..Default::default()
        };
        let targets = parse_targets(&valves).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].project, "group/app");
        assert_eq!(targets[0].path, "src");
        assert_eq!(targets[1].path, "");
        assert_eq!(targets[1].git_ref, "v2");
    }

    #[test]
    fn empty_lists_default_per_project() {
        let valves = GitlabRagValves {
            projects: "group/app;group/lib".to_string(),
            ..Default::default()
        };
        let targets = parse_targets(&valves).unwrap();
        assert_eq!(targets[0].path, "");
        assert_eq!(targets[0].git_ref, "main");
        assert_eq!(targets[1].git_ref, "main");
    }

    #[test]
    fn length_mismatch_degrades_to_null() {
        let valves = GitlabRagValves {
            projects: "group/app;group/lib".to_string(),
            refs: "main".to_string(),
            ..Default::default()
        };
        assert!(parse_targets(&valves).is_none());
    }

    #[test]
    fn model_ids_escape_path_separators() {
        let target = RepoTarget {
            project: "group/app".to_string(),
            path: "src/core".to_string(),
            git_ref: "main".to_string(),
        };
        assert_eq!(target.model_id(), "group__app:src__core:main");
        assert_eq!(target.display_name(), "group/app/src/core @ main");
    }

    #[tokio::test]
    async fn null_model_reports_misconfiguration() {
        let pipeline = GitlabRagPipeline::new(GitlabRagValves {
            projects: "a;b".to_string(),
            refs: "main".to_string(),
            ..Default::default()
        });
        let models = pipeline.models().await;
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "NULL");

        let body: ChatRequest = serde_json::from_value(serde_json::json!({
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();
        let output = pipeline
            .pipe("NULL", &body, &EventSink::disabled())
            .await
            .unwrap();
        match output {
            PipeOutput::Text(text) => assert!(text.starts_with("Error:")),
            _ => panic!("expected text output"),
        }
    }
}
