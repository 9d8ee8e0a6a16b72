//! Prompt enhancer filter.
//!
//! Rewrites the last user message into a clearer, more specific prompt
//! before pipeline dispatch, using the conversation so far as context.
//! Enhancement failures leave the body untouched.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::core::constants::role;
use crate::core::error::PluginError;
use crate::core::plugin::{EventSink, Filter, merge_valves};
use crate::filters::FilterModelValves;
use crate::models::chat::{ChatMessage, ChatRequest};

const DEFAULT_TEMPLATE: &str = r#"You are an expert prompt engineer. Your task is to rewrite the user's prompt so a language model produces the best possible answer.

Conversation so far:
{context}

User prompt to enhance:
{prompt}

Rewrite the prompt to be clear, specific and self-contained. Preserve the user's intent and language. Respond with the enhanced prompt only, without explanations or quotation marks."#;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PromptEnhancerValves {
    /// Must contain `{context}` and `{prompt}` placeholders.
    pub template: String,
    pub show_status: bool,
    /// Emit the rewritten prompt as a message event so the user sees it.
    pub show_enhanced_prompt: bool,
    #[serde(flatten)]
    pub model: FilterModelValves,
}

impl Default for PromptEnhancerValves {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
            show_status: true,
            show_enhanced_prompt: false,
            model: FilterModelValves::default(),
        }
    }
}

pub struct PromptEnhancerFilter {
    valves: RwLock<PromptEnhancerValves>,
}

impl PromptEnhancerFilter {
    pub fn new(valves: PromptEnhancerValves) -> Self {
        Self {
            valves: RwLock::new(valves),
        }
    }
}

/// Conversation history as `ROLE: content` lines, excluding the message
/// being enhanced.
fn conversation_context(messages: &[ChatMessage]) -> String {
    let last_user = messages.iter().rposition(|m| m.role == role::USER);
    messages
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != last_user)
        .map(|(_, m)| format!("{}: {}", m.role.to_uppercase(), m.content_text()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Filter for PromptEnhancerFilter {
    fn id(&self) -> &str {
        "prompt_enhancer"
    }

    async fn inlet(&self, body: &mut ChatRequest, sink: &EventSink) {
        let valves = self.valves.read().await.clone();
        let Some(prompt) = body.last_user_message().filter(|p| !p.trim().is_empty())
        else {
            return;
        };

        if valves.show_status {
            sink.status("Enhancing the prompt", false);
        }

        let context = conversation_context(&body.messages);
        let instruction = valves
            .template
            .replace("{context}", &context)
            .replace("{prompt}", &prompt);

        let chat = match valves.model.chat_client() {
            Ok(client) => client,
            Err(err) => {
                warn!("prompt enhancer unavailable: {}", err);
                if valves.show_status {
                    sink.status("Prompt enhancement skipped", true);
                }
                return;
            }
        };

        let messages = vec![ChatMessage::user(instruction)];
        match chat
            .complete(valves.model.chat_model(), &messages, None, None)
            .await
        {
            Ok(enhanced) if !enhanced.trim().is_empty() => {
                let enhanced = enhanced.trim().to_string();
                info!("prompt enhanced ({} chars)", enhanced.len());
                if valves.show_enhanced_prompt {
                    sink.message(format!("Enhanced prompt: {enhanced}"));
                }
                if let Some(message) = body
                    .messages
                    .iter_mut()
                    .rev()
                    .find(|m| m.role == role::USER)
                {
                    message.content = Value::String(enhanced);
                }
                if valves.show_status {
                    sink.status("Prompt enhanced", true);
                }
            }
            Ok(_) => {
                warn!("prompt enhancer returned an empty rewrite");
                if valves.show_status {
                    sink.status("Prompt enhancement skipped", true);
                }
            }
            Err(err) => {
                warn!("prompt enhancement failed: {}", err);
                if valves.show_status {
                    sink.status(format!("Prompt enhancement failed: {err}"), true);
                }
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
        let next: PromptEnhancerValves = serde_json::from_value(current)
            .map_err(|e| PluginError::BadRequest(format!("invalid valves: {e}")))?;
        *self.valves.write().await = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn context_excludes_message_under_enhancement() {
        let messages = vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("first question"),
            ChatMessage::text(role::ASSISTANT, "first answer"),
            ChatMessage::user("second question"),
        ];
        let context = conversation_context(&messages);
        assert!(context.contains("SYSTEM: be brief"));
        assert!(context.contains("USER: first question"));
        assert!(context.contains("ASSISTANT: first answer"));
        assert!(!context.contains("second question"));
    }

    #[tokio::test]
    async fn empty_prompt_leaves_body_unchanged() {
        let filter = PromptEnhancerFilter::new(PromptEnhancerValves::default());
        let mut body: ChatRequest = serde_json::from_value(json!({
            "messages": [{"role": "assistant", "content": "hello"}]
        }))
        .unwrap();
        let before = serde_json::to_value(&body).unwrap();
        filter.inlet(&mut body, &EventSink::disabled()).await;
        assert_eq!(serde_json::to_value(&body).unwrap(), before);
    }

    #[test]
    fn default_template_has_placeholders() {
        let valves = PromptEnhancerValves::default();
        assert!(valves.template.contains("{context}"));
        assert!(valves.template.contains("{prompt}"));
    }
}
