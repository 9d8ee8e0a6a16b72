//! Application configuration management
//!
//! The host loads a single TOML file at startup. Sections are optional:
//! a plugin is registered only when its section is present, so a minimal
//! config file runs a host with no plugins at all.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::filters::chart_builder::ChartBuilderValves;
use crate::filters::prompt_enhancer::PromptEnhancerValves;
use crate::pipelines::azure_inference::AzureInferenceValves;
use crate::pipelines::azure_openai::AzureOpenAiValves;
use crate::pipelines::github_rag::GithubRagValves;
use crate::pipelines::gitlab_rag::GitlabRagValves;
use crate::tools::news_feed::NewsFeedValves;
use crate::tools::plantuml::PlantUmlValves;

/// Default server port
const DEFAULT_PORT: u16 = 9099;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelinesConfig {
    pub azure_openai: Option<AzureOpenAiValves>,
    pub azure_inference: Option<AzureInferenceValves>,
    pub github_rag: Option<GithubRagValves>,
    pub gitlab_rag: Option<GitlabRagValves>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FiltersConfig {
    pub prompt_enhancer: Option<PromptEnhancerValves>,
    pub chart_builder: Option<ChartBuilderValves>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub news_feed: Option<NewsFeedValves>,
    pub plantuml: Option<PlantUmlValves>,
}

/// Application configuration loaded from TOML files
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub pipelines: PipelinesConfig,
    pub filters: FiltersConfig,
    pub tools: ToolsConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read configuration file")?;
        toml::from_str(&content).context("Failed to parse TOML configuration")
    }

    /// Load configuration from the path in `CONFIG_PATH` (default `config.toml`)
    pub fn from_env() -> Result<Self> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        Self::from_file(config_path)
    }

    /// Number of configured plugins across all kinds
    pub fn plugin_count(&self) -> usize {
        [
            self.pipelines.azure_openai.is_some(),
            self.pipelines.azure_inference.is_some(),
            self.pipelines.github_rag.is_some(),
            self.pipelines.gitlab_rag.is_some(),
            self.filters.prompt_enhancer.is_some(),
            self.filters.chart_builder.is_some(),
            self.tools.news_feed.is_some(),
            self.tools.plantuml.is_some(),
        ]
        .into_iter()
        .filter(|present| *present)
        .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_config() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [server]
            host = "0.0.0.0"
            port = 9099
            log_level = "debug"

            [pipelines.azure_openai]
            endpoint = "https://res.openai.azure.com"
            models = "gpt-4o;o1-mini"
            model_names = "GPT-4o;o1 Mini"

            [pipelines.azure_openai.auth]
            api_key = "test-key"

            [pipelines.github_rag]
            repo_owner = "acme"
            repo_name = "widgets"

            [filters.prompt_enhancer]
            show_status = false

            [tools.news_feed]
            max_items = 5
        "#
        )
        .unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_config_from_file() {
        let file = create_test_config();
        let config = Config::from_file(file.path()).unwrap();

        assert_eq!(config.server.port, 9099);
        assert_eq!(config.server.log_level, "debug");

        let azure = config.pipelines.azure_openai.unwrap();
        assert_eq!(azure.endpoint, "https://res.openai.azure.com");
        assert_eq!(azure.models, "gpt-4o;o1-mini");
        assert_eq!(azure.auth.api_key.as_deref(), Some("test-key"));
        // Unset fields fall back to defaults
        assert_eq!(azure.api_version, "2025-01-01-preview");

        let github = config.pipelines.github_rag.unwrap();
        assert_eq!(github.repo_owner, "acme");
        assert_eq!(github.repo_branch, "main");

        assert!(config.pipelines.azure_inference.is_none());
        assert!(config.filters.chart_builder.is_none());
        assert_eq!(config.tools.news_feed.unwrap().max_items, 5);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "").unwrap();
        file.flush().unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.plugin_count(), 0);
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[server\nport = 9099").unwrap();
        file.flush().unwrap();

        assert!(Config::from_file(file.path()).is_err());
    }

    #[test]
    fn test_plugin_count() {
        let file = create_test_config();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.plugin_count(), 4);
    }
}
