//! CHMC chatbot server.
//!
//! Entry point for the streaming retrieval-augmented chat service.

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::path::Path;
use std::sync::Arc;

use dotenvy::dotenv;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use chmc_chat::chain::AnswerChain;
use chmc_chat::config::AppConfig;
use chmc_chat::langsmith::{LangSmithClient, RunTracer};
use chmc_chat::llm::{ChatCompletionsDriver, LlmSettings};
use chmc_chat::reports::ReportRegistry;
use chmc_chat::retrieval::{EmbeddingsClient, VectorRetriever, WeaviateClient};
use chmc_chat::server::{AppState, build_router};

#[tokio::main]
async fn main() {
    // Initialize tracing (M-LOG-STRUCTURED)
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    // Load .env (if present)
    let _ = dotenv();

    let config = match AppConfig::load().and_then(|c| c.validate().map(|()| c)) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("Configuration error: {msg}");
            std::process::exit(1);
        }
    };

    info!(
        name: "config.loaded",
        model = %config.openai.chat_model,
        index = %config.weaviate.index,
        k = config.retrieval.k,
        "configuration loaded"
    );

    let registry = match ReportRegistry::load(Path::new(&config.ingest.metadata_file)) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Failed to load report metadata: {e}");
            std::process::exit(1);
        }
    };
    info!(
        name: "reports.loaded",
        count = registry.len(),
        file = %config.ingest.metadata_file,
        "report metadata loaded"
    );

    let store = match WeaviateClient::new(&config.weaviate) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };
    let retriever = Arc::new(VectorRetriever::new(
        EmbeddingsClient::new(&config.openai),
        store,
    ));
    let llm = Arc::new(ChatCompletionsDriver::new(LlmSettings {
        base_url: config.openai.base_url.clone(),
        api_key: config.openai.api_key.clone(),
        model: config.openai.chat_model.clone(),
    }));
    let langsmith = Arc::new(LangSmithClient::new(&config.langsmith));
    let mut chain = AnswerChain::new(
        llm,
        retriever,
        Arc::new(registry),
        config.retrieval.k,
        config.retrieval.max_context_tokens,
    );
    // Only record runs when an API key is present; without one the run
    // endpoints reject writes anyway.
    if langsmith.is_configured() {
        chain = chain.with_tracer(Arc::clone(&langsmith) as Arc<dyn RunTracer>);
    }
    let chain = Arc::new(chain);

    let state = AppState { chain, langsmith };
    let app = build_router(state);

    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await.unwrap();

    info!(
        name: "server.started",
        address = %address,
        "Server started"
    );

    axum::serve(listener, app).await.unwrap();
}
