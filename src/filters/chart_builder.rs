//! Chart builder action.
//!
//! Asks the chat model to turn the last assistant message into a
//! self-contained interactive HTML chart, stores the document under the
//! host's upload directory and appends an embed token the host resolves
//! to an iframe.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{error, info};
use uuid::Uuid;

use crate::core::constants::role;
use crate::core::error::PluginError;
use crate::core::plugin::{Action, EventSink, merge_valves};
use crate::filters::FilterModelValves;
use crate::models::chat::{ChatMessage, ChatRequest};

const SYSTEM_PROMPT_BUILD_CHARTS: &str = r#"You are a data visualization assistant. The user gives you a message that contains data, a table or a description of quantities. Produce a single self-contained HTML document that renders the most fitting interactive chart for that data using Plotly loaded from https://cdn.plot.ly/plotly-latest.min.js and rendered with Plotly.newPlot into a full-width div.

Rules:
- Output only the HTML document, no explanations and no markdown fences.
- The document must be valid standalone HTML with the chart filling the viewport.
- Use the data exactly as given; never invent values.
- If the message contains no chartable data, output the exact text NO_CHART."#;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChartBuilderValves {
    /// Host upload directory the embed files are written beneath.
    pub upload_dir: String,
    /// Stem of the generated embed file names.
    pub html_filename: String,
    pub show_status: bool,
    #[serde(flatten)]
    pub model: FilterModelValves,
}

impl Default for ChartBuilderValves {
    fn default() -> Self {
        Self {
            upload_dir: "/app/backend/data/uploads".to_string(),
            html_filename: "chart".to_string(),
            show_status: true,
            model: FilterModelValves::default(),
        }
    }
}

pub struct ChartBuilderAction {
    valves: RwLock<ChartBuilderValves>,
}

impl ChartBuilderAction {
    pub fn new(valves: ChartBuilderValves) -> Self {
        Self {
            valves: RwLock::new(valves),
        }
    }

    async fn write_embed(
        upload_dir: &str,
        stem: &str,
        user_id: &str,
        html: &str,
    ) -> Result<(String, PathBuf), PluginError> {
        let file_id = Uuid::new_v4().to_string();
        let file_name = format!("{}_{}_{}.html", stem, Utc::now().timestamp_millis(), file_id);
        let dir = Path::new(upload_dir).join("chart_embeds").join(user_id);
        let path = dir.join(&file_name);

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| PluginError::Unexpected(format!("create {}: {}", dir.display(), e)))?;
        tokio::fs::write(&path, html)
            .await
            .map_err(|e| PluginError::Unexpected(format!("write {}: {}", path.display(), e)))?;
        Ok((file_id, path))
    }
}

/// Strips a ```html fence when the model wrapped its output anyway.
fn extract_html(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed
        .strip_prefix("```html")
        .or_else(|| trimmed.strip_prefix("```"))
    else {
        return trimmed;
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[async_trait]
impl Action for ChartBuilderAction {
    fn id(&self) -> &str {
        "chart_builder"
    }

    async fn action(&self, body: &mut ChatRequest, sink: &EventSink) {
        let valves = self.valves.read().await.clone();
        let Some(source) = body
            .messages
            .iter()
            .rev()
            .find(|m| m.role == role::ASSISTANT)
            .map(|m| m.content_text())
            .filter(|text| !text.trim().is_empty())
        else {
            sink.status("No assistant message to chart", true);
            return;
        };

        if valves.show_status {
            sink.status("Building a chart", false);
        }

        let chat = match valves.model.chat_client() {
            Ok(client) => client,
            Err(err) => {
                error!("chart builder unavailable: {}", err);
                sink.status(format!("Chart generation failed: {err}"), true);
                return;
            }
        };

        let messages = vec![
            ChatMessage::system(SYSTEM_PROMPT_BUILD_CHARTS),
            ChatMessage::user(source),
        ];
        let raw = match chat
            .complete(valves.model.chat_model(), &messages, Some(0.0), None)
            .await
        {
            Ok(raw) => raw,
            Err(err) => {
                error!("chart generation failed: {}", err);
                sink.status(format!("Chart generation failed: {err}"), true);
                return;
            }
        };

        let html = extract_html(&raw);
        if html == "NO_CHART" || html.is_empty() {
            sink.status("The message contains no chartable data", true);
            return;
        }

        let user_id = body.user_id().unwrap_or_else(|| "anonymous".to_string());
        match Self::write_embed(&valves.upload_dir, &valves.html_filename, &user_id, html).await {
            Ok((file_id, path)) => {
                info!(path = %path.display(), "chart embed written");
                if let Some(message) = body
                    .messages
                    .iter_mut()
                    .rev()
                    .find(|m| m.role == role::ASSISTANT)
                {
                    let embed = format!("\n\n{{{{HTML_FILE_ID_{file_id}}}}}");
                    let mut content = message.content_text();
                    content.push_str(&embed);
                    message.content = Value::String(content);
                }
                if valves.show_status {
                    sink.status("Chart ready", true);
                }
            }
            Err(err) => {
                error!("chart embed write failed: {}", err);
                if let Some(message) = body
                    .messages
                    .iter_mut()
                    .rev()
                    .find(|m| m.role == role::ASSISTANT)
                {
                    let mut content = message.content_text();
                    content.push_str(&format!("\n\n{}", err.user_message()));
                    message.content = Value::String(content);
                }
                sink.status(format!("Chart generation failed: {err}"), true);
            }
        }
    }

    async fn on_valves_updated(&self, patch: Value) -> Result<(), PluginError> {
        let mut current = {
            let valves = self.valves.read().await;
            serde_json::to_value(&*valves)
                .map_err(|e| PluginError::Unexpected(e.to_string()))?
        };
        merge_valves(&mut current, &patch);
        let next: ChartBuilderValves = serde_json::from_value(current)
            .map_err(|e| PluginError::BadRequest(format!("invalid valves: {e}")))?;
        *self.valves.write().await = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn chart_prompt_targets_plotly() {
        assert!(SYSTEM_PROMPT_BUILD_CHARTS.contains("https://cdn.plot.ly/plotly-latest.min.js"));
    }

    #[test]
    fn extract_html_strips_fences() {
        assert_eq!(extract_html("```html\n<html></html>\n```"), "<html></html>");
        assert_eq!(extract_html("```\n<html/>\n```"), "<html/>");
        assert_eq!(extract_html("<html></html>"), "<html></html>");
    }

    #[tokio::test]
    async fn embed_file_lands_under_user_directory() {
        let dir = tempdir().unwrap();
        let (file_id, path) = ChartBuilderAction::write_embed(
            dir.path().to_str().unwrap(),
            "chart",
            "u-42",
            "<html></html>",
        )
        .await
        .unwrap();

        assert!(path.starts_with(dir.path().join("chart_embeds").join("u-42")));
        assert!(path.to_string_lossy().contains(&file_id));
        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(written, "<html></html>");
    }

    #[tokio::test]
    async fn missing_assistant_message_is_a_noop() {
        let action = ChartBuilderAction::new(ChartBuilderValves::default());
        let mut body: ChatRequest = serde_json::from_value(json!({
            "messages": [{"role": "user", "content": "chart this"}]
        }))
        .unwrap();
        let before = serde_json::to_value(&body).unwrap();
        action.action(&mut body, &EventSink::disabled()).await;
        assert_eq!(serde_json::to_value(&body).unwrap(), before);
    }
}
