//! API endpoint handlers
//!
//! This module implements the HTTP surface of the plugin host: model
//! listing, chat completion dispatch to the registered pipelines, valves
//! updates, and direct routes for the tool and action plugins.

use crate::core::config::Config;
use crate::core::error::PluginError;
use crate::core::plugin::{Action, EventSink, Filter, PipeOutput, Pipeline, PluginEvent};
use crate::models::chat::ChatRequest;
use crate::tools::news_feed::NewsFeedTool;
use crate::tools::plantuml::PlantUmlTool;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response, Sse},
    routing::{get, post},
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pipelines: Vec<Arc<dyn Pipeline>>,
    pub filters: Vec<Arc<dyn Filter>>,
    pub actions: Vec<Arc<dyn Action>>,
    pub news_feed: Option<Arc<NewsFeedTool>>,
    pub plantuml: Option<Arc<PlantUmlTool>>,
}

impl AppState {
    fn pipeline(&self, id: &str) -> Option<&Arc<dyn Pipeline>> {
        self.pipelines.iter().find(|p| p.id() == id)
    }
}

/// Create the API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/v1/models", get(list_models))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/pipelines/{id}/valves", post(update_valves))
        .route("/v1/actions/{id}", post(run_action))
        .route("/v1/tools/news/headlines/{category}", get(news_headlines))
        .route("/v1/tools/news/article", get(news_article))
        .route("/v1/tools/plantuml", post(render_plantuml))
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let body = json!({
        "error": {
            "type": "invalid_request_error",
            "message": message.into(),
        }
    });
    (status, Json(body)).into_response()
}

/// Wrap plain text in an OpenAI chat completion envelope
fn completion_envelope(model: &str, content: String) -> Value {
    json!({
        "id": format!("chatcmpl-{}", Uuid::new_v4()),
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop",
        }],
    })
}

/// GET / - Root endpoint
async fn root(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "message": format!("Chat Pipelines Host v{}", env!("CARGO_PKG_VERSION")),
        "status": "running",
        "pipelines": state.pipelines.iter().map(|p| p.id()).collect::<Vec<_>>(),
        "filters": state.filters.iter().map(|f| f.id()).collect::<Vec<_>>(),
        "actions": state.actions.iter().map(|a| a.id()).collect::<Vec<_>>(),
        "endpoints": {
            "models": "/v1/models",
            "chat_completions": "/v1/chat/completions",
            "valves": "/v1/pipelines/{id}/valves",
            "health": "/health",
        },
    }))
}

/// GET /health - Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "plugins": state.config.plugin_count(),
    }))
}

/// GET /v1/models - All pipeline models, namespaced as `{pipeline_id}.{model_id}`
async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    let mut data = Vec::new();
    for pipeline in &state.pipelines {
        for model in pipeline.models().await {
            data.push(json!({
                "id": format!("{}.{}", pipeline.id(), model.id),
                "object": "model",
                "name": model.name,
                "owned_by": pipeline.name(),
            }));
        }
    }
    Json(json!({ "object": "list", "data": data }))
}

/// POST /v1/chat/completions - Dispatch one chat turn to a pipeline
async fn chat_completions(
    State(state): State<AppState>,
    Json(mut body): Json<ChatRequest>,
) -> Response {
    // Filters run first and may rewrite the body; their failures are
    // reported through the sink, never as request failures.
    for filter in &state.filters {
        let sink = EventSink::logging(filter.id());
        filter.inlet(&mut body, &sink).await;
    }

    let Some((pipeline_id, model_id)) = body.model.split_once('.') else {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!(
                "model '{}' is not namespaced as '{{pipeline}}.{{model}}'",
                body.model
            ),
        );
    };
    let Some(pipeline) = state.pipeline(pipeline_id) else {
        return error_response(
            StatusCode::NOT_FOUND,
            format!("unknown pipeline '{pipeline_id}'"),
        );
    };

    debug!(pipeline = pipeline_id, model = model_id, "dispatching chat turn");
    let sink = EventSink::logging(pipeline.id());
    let requested_model = body.model.clone();
    match pipeline.pipe(model_id, &body, &sink).await {
        Ok(PipeOutput::Text(content)) => {
            Json(completion_envelope(&requested_model, content)).into_response()
        }
        Ok(PipeOutput::Full(value)) => Json(value).into_response(),
        Ok(PipeOutput::Stream(stream)) => {
            let sse_stream = stream.filter_map(|item| async move {
                match item {
                    // Upstream lines arrive SSE-framed already; re-frame
                    // the payloads so blank keep-alive lines are dropped.
                    Ok(line) => {
                        let payload = line.strip_prefix("data: ").unwrap_or(&line).to_string();
                        if payload.is_empty() {
                            None
                        } else {
                            Some(Ok::<_, Infallible>(
                                axum::response::sse::Event::default().data(payload),
                            ))
                        }
                    }
                    Err(e) => {
                        error!("stream error: {}", e);
                        Some(Ok(axum::response::sse::Event::default()
                            .data(json!({ "error": e.to_string() }).to_string())))
                    }
                }
            });

            let mut response = Sse::new(sse_stream)
                .keep_alive(axum::response::sse::KeepAlive::default())
                .into_response();
            let response_headers = response.headers_mut();
            response_headers.insert("Cache-Control", "no-cache".parse().unwrap());
            response_headers.insert("Connection", "keep-alive".parse().unwrap());
            response
        }
        Err(e) => {
            error!(pipeline = pipeline_id, "pipeline error: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// POST /v1/pipelines/{id}/valves - Apply a partial valves update
async fn update_valves(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<Value>,
) -> Response {
    let result = if let Some(pipeline) = state.pipeline(&id) {
        pipeline.on_valves_updated(patch).await
    } else if let Some(filter) = state.filters.iter().find(|f| f.id() == id) {
        filter.on_valves_updated(patch).await
    } else if let Some(action) = state.actions.iter().find(|a| a.id() == id) {
        action.on_valves_updated(patch).await
    } else if let Some(tool) = state.news_feed.as_ref().filter(|t| t.id() == id) {
        tool.on_valves_updated(patch).await
    } else if let Some(tool) = state.plantuml.as_ref().filter(|t| t.id() == id) {
        tool.on_valves_updated(patch).await
    } else {
        return error_response(StatusCode::NOT_FOUND, format!("unknown plugin '{id}'"));
    };

    match result {
        Ok(()) => {
            info!(plugin = %id, "valves updated");
            Json(json!({ "status": "updated", "plugin": id })).into_response()
        }
        Err(e @ PluginError::BadRequest(_)) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Drain a channel sink into a serializable event list
async fn drain_events(
    sink: EventSink,
    mut rx: tokio::sync::mpsc::UnboundedReceiver<PluginEvent>,
) -> Vec<PluginEvent> {
    drop(sink);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

/// POST /v1/actions/{id} - Run an action against a chat body
async fn run_action(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut body): Json<ChatRequest>,
) -> Response {
    let Some(action) = state.actions.iter().find(|a| a.id() == id) else {
        return error_response(StatusCode::NOT_FOUND, format!("unknown action '{id}'"));
    };

    let (sink, rx) = EventSink::channel();
    action.action(&mut body, &sink).await;
    let events = drain_events(sink, rx).await;

    Json(json!({ "body": body, "events": events })).into_response()
}

/// GET /v1/tools/news/headlines/{category}
async fn news_headlines(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> Response {
    let Some(tool) = &state.news_feed else {
        return error_response(StatusCode::NOT_FOUND, "news feed tool is not configured");
    };

    let (sink, rx) = EventSink::channel();
    let result = tool.headlines(&category, &sink).await;
    let events = drain_events(sink, rx).await;
    Json(json!({ "result": result, "events": events })).into_response()
}

#[derive(Debug, Deserialize)]
struct ArticleQuery {
    url: String,
}

/// GET /v1/tools/news/article?url=...
async fn news_article(
    State(state): State<AppState>,
    Query(query): Query<ArticleQuery>,
) -> Response {
    let Some(tool) = &state.news_feed else {
        return error_response(StatusCode::NOT_FOUND, "news feed tool is not configured");
    };

    let (sink, rx) = EventSink::channel();
    let result = tool.article(&query.url, &sink).await;
    let events = drain_events(sink, rx).await;
    Json(json!({ "result": result, "events": events })).into_response()
}

#[derive(Debug, Deserialize)]
struct PlantUmlRequest {
    source: String,
}

/// POST /v1/tools/plantuml - Render a diagram
async fn render_plantuml(
    State(state): State<AppState>,
    Json(request): Json<PlantUmlRequest>,
) -> Response {
    let Some(tool) = &state.plantuml else {
        return error_response(StatusCode::NOT_FOUND, "plantuml tool is not configured");
    };

    let (sink, rx) = EventSink::channel();
    let result = tool.render(&request.source, &sink).await;
    let events = drain_events(sink, rx).await;
    Json(json!({ "result": result, "events": events })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plugin::ModelIdentity;
    use async_trait::async_trait;

    struct EchoPipeline;

    #[async_trait]
    impl Pipeline for EchoPipeline {
        fn id(&self) -> &str {
            "echo"
        }

        fn name(&self) -> &str {
            "Echo"
        }

        async fn models(&self) -> Vec<ModelIdentity> {
            vec![ModelIdentity {
                id: "one".to_string(),
                name: "Echo One".to_string(),
            }]
        }

        async fn pipe(
            &self,
            _model_id: &str,
            body: &ChatRequest,
            _sink: &EventSink,
        ) -> Result<PipeOutput, PluginError> {
            Ok(PipeOutput::Text(
                body.last_user_message().unwrap_or_default(),
            ))
        }
    }

    fn test_state() -> AppState {
        AppState {
            config: Arc::new(Config::default()),
            pipelines: vec![Arc::new(EchoPipeline)],
            filters: Vec::new(),
            actions: Vec::new(),
            news_feed: None,
            plantuml: None,
        }
    }

    #[tokio::test]
    async fn models_are_namespaced() {
        let response = list_models(State(test_state())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["object"], json!("list"));
        assert_eq!(value["data"][0]["id"], json!("echo.one"));
        assert_eq!(value["data"][0]["owned_by"], json!("Echo"));
    }

    #[tokio::test]
    async fn unnamespaced_model_is_rejected() {
        let body: ChatRequest = serde_json::from_value(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();
        let response = chat_completions(State(test_state()), Json(body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn text_output_gets_completion_envelope() {
        let body: ChatRequest = serde_json::from_value(json!({
            "model": "echo.one",
            "messages": [{"role": "user", "content": "hello there"}]
        }))
        .unwrap();
        let response = chat_completions(State(test_state()), Json(body)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["object"], json!("chat.completion"));
        assert_eq!(
            value["choices"][0]["message"]["content"],
            json!("hello there")
        );
        assert_eq!(value["model"], json!("echo.one"));
    }

    #[tokio::test]
    async fn unknown_pipeline_is_not_found() {
        let body: ChatRequest = serde_json::from_value(json!({
            "model": "missing.one",
            "messages": []
        }))
        .unwrap();
        let response = chat_completions(State(test_state()), Json(body)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
