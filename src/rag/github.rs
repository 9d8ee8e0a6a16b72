//! GitHub repository reader
//!
//! Lists a branch tree through the REST API, applies the extension and
//! directory filters, and fetches the surviving blobs as raw text. Binary
//! or otherwise undecodable files are skipped.

use crate::core::error::PluginError;
use crate::rag::RepoFilters;
use crate::rag::index::Document;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const GITHUB_API: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("chat-pipelines/", env!("CARGO_PKG_VERSION"));
const FETCH_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    entry_type: String,
}

pub struct GithubReader {
    client: Client,
    token: String,
    owner: String,
    repo: String,
}

impl GithubReader {
    pub fn new(token: &str, owner: &str, repo: &str) -> Result<Self, PluginError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()
            .map_err(|e| PluginError::Unexpected(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            token: token.to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header("User-Agent", USER_AGENT)
            .header("X-GitHub-Api-Version", "2022-11-28")
            .bearer_auth(&self.token)
    }

    /// Load every filter-passing blob on the branch as a document
    pub async fn load_branch(
        &self,
        branch: &str,
        filters: &RepoFilters,
    ) -> Result<Vec<Document>, PluginError> {
        let url = format!(
            "{}/repos/{}/{}/git/trees/{}?recursive=1",
            GITHUB_API, self.owner, self.repo, branch
        );
        let response = self
            .get(&url)
            .header("Accept", "application/vnd.github+json")
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

        let tree: TreeResponse = response
            .json()
            .await
            .map_err(|e| PluginError::Unexpected(format!("Failed to parse tree: {}", e)))?;
        if tree.truncated {
            warn!(
                "GitHub tree listing for {}/{} was truncated",
                self.owner, self.repo
            );
        }

        let mut documents = Vec::new();
        for entry in tree.tree {
            if entry.entry_type != "blob" || !filters.allows(&entry.path) {
                continue;
            }
            match self.fetch_file(branch, &entry.path).await {
                Ok(Some(text)) => documents.push(Document {
                    source: entry.path,
                    text,
                }),
                Ok(None) => debug!("skipping undecodable blob {}", entry.path),
                Err(e) => warn!("failed to fetch {}: {}", entry.path, e),
            }
        }

        Ok(documents)
    }

    /// Raw file content at a branch, or None for non-text blobs
    async fn fetch_file(&self, branch: &str, path: &str) -> Result<Option<String>, PluginError> {
        let url = format!(
            "{}/repos/{}/{}/contents/{}?ref={}",
            GITHUB_API, self.owner, self.repo, path, branch
        );
        let response = self
            .get(&url)
            .header("Accept", "application/vnd.github.raw+json")
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
}
