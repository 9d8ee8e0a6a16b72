//! Chat pipelines host
//!
//! An OpenAI-compatible HTTP host for a set of chat plugins: provider
//! pipelines (Azure OpenAI, Azure AI Inference), repository RAG pipelines
//! (GitHub, GitLab), request filters and standalone tools. Plugins are
//! registered from the TOML configuration at startup.

mod api;
mod core;
mod filters;
mod models;
mod pipelines;
mod rag;
mod tools;

use crate::api::endpoints::{AppState, create_router};
use crate::core::config::Config;
use crate::core::logging::init_logging;
use crate::core::plugin::{Action, Filter, Pipeline};
use crate::filters::chart_builder::ChartBuilderAction;
use crate::filters::prompt_enhancer::PromptEnhancerFilter;
use crate::pipelines::azure_inference::AzureInferencePipeline;
use crate::pipelines::azure_openai::AzureOpenAiPipeline;
use crate::pipelines::github_rag::GithubRagPipeline;
use crate::pipelines::gitlab_rag::GitlabRagPipeline;
use crate::tools::news_feed::NewsFeedTool;
use crate::tools::plantuml::PlantUmlTool;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    if std::env::args().any(|arg| arg == "--help") {
        print_help();
        return;
    }

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            eprintln!("Configuration Error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config.server.log_level);

    // Register plugins from the configured sections
    let mut pipelines: Vec<Arc<dyn Pipeline>> = Vec::new();
    if let Some(valves) = config.pipelines.azure_openai.clone() {
        match AzureOpenAiPipeline::new(valves) {
            Ok(pipeline) => pipelines.push(Arc::new(pipeline)),
            Err(e) => {
                error!("azure_openai pipeline rejected its configuration: {}", e);
                std::process::exit(1);
            }
        }
    }
    if let Some(valves) = config.pipelines.azure_inference.clone() {
        match AzureInferencePipeline::new(valves) {
            Ok(pipeline) => pipelines.push(Arc::new(pipeline)),
            Err(e) => {
                error!("azure_inference pipeline rejected its configuration: {}", e);
                std::process::exit(1);
            }
        }
    }
    if let Some(valves) = config.pipelines.github_rag.clone() {
        pipelines.push(Arc::new(GithubRagPipeline::new(valves)));
    }
    if let Some(valves) = config.pipelines.gitlab_rag.clone() {
        pipelines.push(Arc::new(GitlabRagPipeline::new(valves)));
    }

    let mut request_filters: Vec<Arc<dyn Filter>> = Vec::new();
    if let Some(valves) = config.filters.prompt_enhancer.clone() {
        request_filters.push(Arc::new(PromptEnhancerFilter::new(valves)));
    }

    let mut actions: Vec<Arc<dyn Action>> = Vec::new();
    if let Some(valves) = config.filters.chart_builder.clone() {
        actions.push(Arc::new(ChartBuilderAction::new(valves)));
    }

    let news_feed = match config.tools.news_feed.clone().map(NewsFeedTool::new) {
        Some(Ok(tool)) => Some(Arc::new(tool)),
        Some(Err(e)) => {
            error!("news_feed tool rejected its configuration: {}", e);
            std::process::exit(1);
        }
        None => None,
    };
    let plantuml = match config.tools.plantuml.clone().map(PlantUmlTool::new) {
        Some(Ok(tool)) => Some(Arc::new(tool)),
        Some(Err(e)) => {
            error!("plantuml tool rejected its configuration: {}", e);
            std::process::exit(1);
        }
        None => None,
    };

    print_startup_banner(&config, &pipelines);

    // Startup hooks; RAG pipelines build their knowledge bases here, so
    // the server only accepts traffic once every index is in place.
    for pipeline in &pipelines {
        info!(pipeline = pipeline.id(), "running startup hook");
        pipeline.on_startup().await;
    }

    let app_state = AppState {
        config: config.clone(),
        pipelines: pipelines.clone(),
        filters: request_filters,
        actions,
        news_feed,
        plantuml,
    };

    let app = create_router(app_state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("Server listening on http://{}", addr);

    let shutdown_signal = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
        }
    };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
    {
        error!("Server error: {}", e);
        std::process::exit(1);
    }

    for pipeline in &pipelines {
        info!(pipeline = pipeline.id(), "running shutdown hook");
        pipeline.on_shutdown().await;
    }
}

/// Print startup banner with configuration
fn print_startup_banner(config: &Config, pipelines: &[Arc<dyn Pipeline>]) {
    println!("🚀 Chat Pipelines Host v{}", env!("CARGO_PKG_VERSION"));
    println!("✅ Configuration loaded successfully");
    println!("   Plugins configured: {}", config.plugin_count());
    for pipeline in pipelines {
        println!("   Pipeline: {} ({})", pipeline.id(), pipeline.name());
    }
    println!("   Server: {}:{}", config.server.host, config.server.port);
    println!("   Log Level: {}", config.server.log_level);
    println!();
}

/// Print help message
fn print_help() {
    println!("Chat Pipelines Host v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: chat-pipelines [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --help    Display this help message");
    println!();
    println!("Environment variables:");
    println!("  CONFIG_PATH - Path to the TOML configuration (default: config.toml)");
    println!();
    println!("Configuration sections (all optional):");
    println!("  [server]                     - host, port, log_level");
    println!("  [pipelines.azure_openai]     - Azure OpenAI manifold pipeline");
    println!("  [pipelines.azure_inference]  - Azure AI Inference pipeline");
    println!("  [pipelines.github_rag]       - GitHub repository RAG pipeline");
    println!("  [pipelines.gitlab_rag]       - GitLab repository RAG pipeline");
    println!("  [filters.prompt_enhancer]    - Prompt enhancement filter");
    println!("  [filters.chart_builder]      - Chart builder action");
    println!("  [tools.news_feed]            - BBC news tool");
    println!("  [tools.plantuml]             - PlantUML rendering tool");
}
