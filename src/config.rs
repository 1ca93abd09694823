//! Layered application configuration.
//!
//! Priority, lowest to highest: built-in defaults, optional config file,
//! `CHMC_`-prefixed environment variables (`CHMC_SERVER__PORT=8000`),
//! legacy environment names from the original deployment (`WEAVIATE_URL`,
//! `OPENAI_API_KEY`, ...), then CLI flags.

use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Host interface to bind
    #[arg(long)]
    pub host: Option<String>,

    /// Directory holding the report files to ingest
    #[arg(long)]
    pub reports_dir: Option<String>,

    /// Report metadata JSON file
    #[arg(long)]
    pub metadata_file: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub openai: OpenAiConfig,
    pub weaviate: WeaviateConfig,
    pub langsmith: LangSmithConfig,
    pub retrieval: RetrievalConfig,
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub embed_batch_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WeaviateConfig {
    pub url: String,
    pub api_key: String,
    /// Weaviate class holding the report chunks.
    pub index: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LangSmithConfig {
    /// API endpoint for feedback and run reads.
    pub base_url: String,
    /// Public hostname used to build shared trace URLs.
    pub hostname: String,
    pub api_key: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Number of chunks to retrieve per question.
    pub k: usize,
    /// Token budget for the context block (model window minus headroom).
    pub max_context_tokens: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    pub reports_dir: String,
    pub metadata_file: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// HTTP extraction service for formats without local support (PDF).
    pub extractor_url: String,
}

impl AppConfig {
    /// Load configuration from the process arguments and environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_args(env::args())
    }

    /// Load configuration from explicit arguments (testable entry point).
    pub fn load_from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("openai.base_url", "https://api.openai.com")?
            .set_default("openai.api_key", "")?
            .set_default("openai.chat_model", "gpt-3.5-turbo-16k")?
            .set_default("openai.embedding_model", "text-embedding-ada-002")?
            .set_default("openai.embed_batch_size", 200)?
            .set_default("weaviate.url", "")?
            .set_default("weaviate.api_key", "")?
            .set_default("weaviate.index", "ChmcReports")?
            .set_default("langsmith.base_url", "https://api.smith.langchain.com")?
            .set_default("langsmith.hostname", "https://smith.langchain.com")?
            .set_default("langsmith.api_key", "")?
            .set_default("retrieval.k", 8)?
            .set_default("retrieval.max_context_tokens", 12_000)?
            .set_default("ingest.reports_dir", "reports")?
            .set_default("ingest.metadata_file", "reports_metadata.json")?
            .set_default("ingest.chunk_size", 4000)?
            .set_default("ingest.chunk_overlap", 200)?
            .set_default("ingest.extractor_url", "")?;

        if let Some(path) = &cli.config {
            builder = builder.add_source(File::with_name(path));
        } else if std::path::Path::new("config.yaml").exists() {
            builder = builder.add_source(File::with_name("config"));
        }

        // Prefixed environment variables, e.g. CHMC_RETRIEVAL__K=4.
        builder = builder.add_source(
            Environment::with_prefix("CHMC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // Legacy names used by the original deployment.
        if let Ok(val) = env::var("WEAVIATE_URL") {
            builder = builder.set_override("weaviate.url", val)?;
        }
        if let Ok(val) = env::var("WEAVIATE_API_KEY") {
            builder = builder.set_override("weaviate.api_key", val)?;
        }
        if let Ok(val) = env::var("OPENAI_API_KEY") {
            builder = builder.set_override("openai.api_key", val)?;
        }
        if let Ok(val) = env::var("LANGCHAIN_API_KEY") {
            builder = builder.set_override("langsmith.api_key", val)?;
        }

        // CLI overrides win over everything above.
        if let Some(host) = cli.host {
            builder = builder.set_override("server.host", host)?;
        }
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(dir) = cli.reports_dir {
            builder = builder.set_override("ingest.reports_dir", dir)?;
        }
        if let Some(file) = cli.metadata_file {
            builder = builder.set_override("ingest.metadata_file", file)?;
        }

        let cfg = builder.build()?;
        cfg.try_deserialize()
    }

    /// Check settings that have no usable default.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.weaviate.url.trim().is_empty() {
            return Err(ConfigError::Message(
                "weaviate.url is required (set WEAVIATE_URL)".to_string(),
            ));
        }
        if self.openai.api_key.trim().is_empty() {
            return Err(ConfigError::Message(
                "openai.api_key is required (set OPENAI_API_KEY)".to_string(),
            ));
        }
        Ok(())
    }
}
