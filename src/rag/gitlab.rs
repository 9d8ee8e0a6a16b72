//! GitLab project reader
//!
//! Resolves a project id from its path, walks the repository tree for raw
//! file content, and optionally loads the project's issue list (all states)
//! as additional documents. Listing endpoints are paginated.

use crate::core::error::PluginError;
use crate::rag::RepoFilters;
use crate::rag::index::Document;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const FETCH_TIMEOUT_SECS: u64 = 60;
const PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
struct Project {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    entry_type: String,
}

#[derive(Debug, Deserialize)]
struct Issue {
    iid: u64,
    title: String,
    #[serde(default)]
    description: Option<String>,
    state: String,
}

pub struct GitlabReader {
    client: Client,
    base_url: String,
    token: String,
}

impl GitlabReader {
    pub fn new(base_url: &str, token: &str) -> Result<Self, PluginError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()
            .map_err(|e| PluginError::Unexpected(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/v4/{}", self.base_url, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, PluginError> {
        let response = self
            .client
            .get(url)
            .header("PRIVATE-TOKEN", &self.token)
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

        response
            .json()
            .await
            .map_err(|e| PluginError::Unexpected(format!("Failed to parse response: {}", e)))
    }

    /// Numeric project id for a `group/project` path
    pub async fn project_id(&self, project_path: &str) -> Result<u64, PluginError> {
        let url = self.api(&format!("projects/{}", urlencoding::encode(project_path)));
        let project: Project = self.get_json(&url).await?;
        debug!("project {} => id {}", project_path, project.id);
        Ok(project.id)
    }

    /// Filter-passing repository files under `path` at `ref`, as documents
    pub async fn load_tree(
        &self,
        project_id: u64,
        path: &str,
        git_ref: &str,
        filters: &RepoFilters,
    ) -> Result<Vec<Document>, PluginError> {
        let mut entries: Vec<TreeEntry> = Vec::new();
        let mut page = 1u32;
        loop {
            let url = self.api(&format!(
                "projects/{}/repository/tree?recursive=true&ref={}&path={}&per_page={}&page={}",
                project_id,
                urlencoding::encode(git_ref),
                urlencoding::encode(path),
                PAGE_SIZE,
                page
            ));
            let batch: Vec<TreeEntry> = self.get_json(&url).await?;
            let done = (batch.len() as u32) < PAGE_SIZE;
            entries.extend(batch);
            if done {
                break;
            }
            page += 1;
        }

        let mut documents = Vec::new();
        for entry in entries {
            if entry.entry_type != "blob" || !filters.allows(&entry.path) {
                continue;
            }
            match self.fetch_raw_file(project_id, &entry.path, git_ref).await {
                Ok(Some(text)) => documents.push(Document {
                    source: entry.path,
                    text,
                }),
                Ok(None) => debug!("skipping undecodable file {}", entry.path),
                Err(e) => warn!("failed to fetch {}: {}", entry.path, e),
            }
        }

        Ok(documents)
    }

    async fn fetch_raw_file(
        &self,
        project_id: u64,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<String>, PluginError> {
        let url = self.api(&format!(
            "projects/{}/repository/files/{}/raw?ref={}",
            project_id,
            urlencoding::encode(path),
            urlencoding::encode(git_ref)
        ));
        let response = self
            .client
            .get(&url)
            .header("PRIVATE-TOKEN", &self.token)
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

        let bytes = response
            .bytes()
            .await
            .map_err(PluginError::from_transport)?;
        Ok(String::from_utf8(bytes.to_vec()).ok())
    }

    /// Project issues in every state, one document per issue
    pub async fn load_issues(&self, project_id: u64) -> Result<Vec<Document>, PluginError> {
        let mut documents = Vec::new();
        let mut page = 1u32;
        loop {
            let url = self.api(&format!(
                "projects/{}/issues?state=all&per_page={}&page={}",
                project_id, PAGE_SIZE, page
            ));
            let batch: Vec<Issue> = self.get_json(&url).await?;
            let done = (batch.len() as u32) < PAGE_SIZE;
            for issue in batch {
                documents.push(Document {
                    source: format!("issue #{}", issue.iid),
                    text: format!(
                        "Issue #{} ({}): {}\n\n{}",
                        issue.iid,
                        issue.state,
                        issue.title,
                        issue.description.unwrap_or_default()
                    ),
                });
            }
            if done {
                break;
            }
            page += 1;
        }

        Ok(documents)
    }
}
