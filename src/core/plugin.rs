//! Host plugin contract
//!
//! Pipelines are the host's model-provider adapters; a manifold pipeline
//! exposes several selectable model identities. Filters mutate the request
//! body before dispatch, actions post-process a finished turn. All three
//! report progress through an `EventSink`.

use crate::core::error::PluginError;
use crate::models::chat::ChatRequest;
use async_trait::async_trait;
use futures::stream::Stream;
use serde_json::Value;
use std::pin::Pin;
use tokio::sync::mpsc;
use tracing::info;

/// Streaming pipe output: provider SSE lines forwarded verbatim
pub type PipeStream = Pin<Box<dyn Stream<Item = Result<String, PluginError>> + Send>>;

/// What a pipeline hands back to the host for one chat turn
pub enum PipeOutput {
    /// Plain text used as the assistant message content
    Text(String),
    /// A full provider response body forwarded as-is
    Full(Value),
    /// A pull-based sequence of provider stream chunks
    Stream(PipeStream),
}

/// One selectable model identity of a manifold pipeline
#[derive(Debug, Clone, serde::Serialize)]
pub struct ModelIdentity {
    pub id: String,
    pub name: String,
}

/// Events a plugin can raise during a turn
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PluginEvent {
    Status { description: String, done: bool },
    Message { content: String },
}

/// Clonable handle for emitting plugin events back to the host.
/// A sink without a channel swallows events.
#[derive(Clone)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<PluginEvent>>,
}

impl EventSink {
    /// A sink that drops every event
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// A sink paired with a receiver for the host to drain
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PluginEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink whose events are logged as they arrive
    pub fn logging(plugin_id: &str) -> Self {
        let (sink, mut rx) = Self::channel();
        let plugin_id = plugin_id.to_string();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    PluginEvent::Status { description, done } => {
                        info!(plugin = %plugin_id, done, "status: {}", description)
                    }
                    PluginEvent::Message { content } => {
                        info!(plugin = %plugin_id, "message: {}", content)
                    }
                }
            }
        });
        sink
    }

    pub fn status(&self, description: impl Into<String>, done: bool) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(PluginEvent::Status {
                description: description.into(),
                done,
            });
        }
    }

    pub fn message(&self, content: impl Into<String>) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(PluginEvent::Message {
                content: content.into(),
            });
        }
    }
}

/// A model-provider adapter invoked once per chat turn
#[async_trait]
pub trait Pipeline: Send + Sync {
    /// Stable identifier used to namespace this pipeline's model ids
    fn id(&self) -> &str;

    /// Human-readable pipeline name
    fn name(&self) -> &str;

    /// The model identities this pipeline exposes
    async fn models(&self) -> Vec<ModelIdentity>;

    /// Handle one chat turn addressed to `model_id`
    async fn pipe(
        &self,
        model_id: &str,
        body: &ChatRequest,
        sink: &EventSink,
    ) -> Result<PipeOutput, PluginError>;

    /// Called once when the host starts
    async fn on_startup(&self) {}

    /// Called once when the host shuts down
    async fn on_shutdown(&self) {}

    /// Apply a valves patch; expensive plugins rebuild their state here
    async fn on_valves_updated(&self, _valves: Value) -> Result<(), PluginError> {
        Ok(())
    }
}

/// A request filter run before pipeline dispatch.
///
/// Filter failures never abort the turn: implementations report problems
/// through the sink and leave the body unchanged.
#[async_trait]
pub trait Filter: Send + Sync {
    fn id(&self) -> &str;

    async fn inlet(&self, body: &mut ChatRequest, sink: &EventSink);

    async fn on_valves_updated(&self, _valves: Value) -> Result<(), PluginError> {
        Ok(())
    }
}

/// A post-turn action invoked on demand against a finished chat body
#[async_trait]
pub trait Action: Send + Sync {
    fn id(&self) -> &str;

    async fn action(&self, body: &mut ChatRequest, sink: &EventSink);

    async fn on_valves_updated(&self, _valves: Value) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Overlay `patch` onto `base`, replacing scalar values and recursing into
/// objects. Valves updates arrive as partial JSON documents.
pub fn merge_valves(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                match base_map.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_valves(existing, value)
                    }
                    _ => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_valves_replaces_scalars_and_recurses() {
        let mut base = json!({
            "endpoint": "https://old.example",
            "models": "gpt-4o",
            "auth": {"api_key": "a", "tenant_id": "t"}
        });
        merge_valves(
            &mut base,
            &json!({"models": "gpt-4o;o1", "auth": {"api_key": "b"}}),
        );
        assert_eq!(base["endpoint"], "https://old.example");
        assert_eq!(base["models"], "gpt-4o;o1");
        assert_eq!(base["auth"]["api_key"], "b");
        assert_eq!(base["auth"]["tenant_id"], "t");
    }

    #[tokio::test]
    async fn test_event_sink_channel_delivers_in_order() {
        let (sink, mut rx) = EventSink::channel();
        sink.status("working", false);
        sink.message("hello");
        sink.status("done", true);
        drop(sink);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[0],
            PluginEvent::Status { done: false, .. }
        ));
        assert!(matches!(&events[1], PluginEvent::Message { .. }));
        assert!(matches!(&events[2], PluginEvent::Status { done: true, .. }));
    }

    #[test]
    fn test_disabled_sink_swallows_events() {
        let sink = EventSink::disabled();
        sink.status("ignored", true);
        sink.message("ignored");
    }
}
