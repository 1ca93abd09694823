//! Report ingestion entry point.
//!
//! Drops and recreates the vector store class, then extracts, chunks,
//! embeds and indexes every file in the reports directory.

use std::path::Path;

use dotenvy::dotenv;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use chmc_chat::config::AppConfig;
use chmc_chat::ingest::{IngestPipeline, chunking::Chunker, extract::ExtractorFactory};
use chmc_chat::retrieval::{EmbeddingsClient, WeaviateClient};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let _ = dotenv();

    let config = match AppConfig::load().and_then(|c| c.validate().map(|()| c)) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("Configuration error: {msg}");
            std::process::exit(1);
        }
    };

    let store = match WeaviateClient::new(&config.weaviate) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };
    let pipeline = IngestPipeline::new(
        ExtractorFactory::new(&config.ingest.extractor_url),
        Chunker::new(config.ingest.chunk_size, config.ingest.chunk_overlap),
        EmbeddingsClient::new(&config.openai),
        store,
    );

    match pipeline.run(Path::new(&config.ingest.reports_dir)).await {
        Ok(stats) => {
            for doc in &stats.per_document {
                info!(file = %doc.file, pages = doc.pages, chunks = doc.chunks, "ingested");
            }
            info!(
                documents = stats.documents,
                pages = stats.pages,
                chunks = stats.chunks,
                skipped = stats.skipped,
                "ingestion finished"
            );
        }
        Err(e) => {
            tracing::error!(error = %e, "ingestion failed");
            std::process::exit(1);
        }
    }
}
