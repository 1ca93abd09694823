//! Context retrieval over the report vector store.
//!
//! Queries are embedded with the OpenAI embeddings API and matched against
//! the Weaviate class holding report chunks. The [`Retriever`] trait is the
//! seam the answer chain depends on, so the chain can be exercised without
//! a network.

pub mod embeddings;
pub mod weaviate;

pub use embeddings::EmbeddingsClient;
pub use weaviate::{ChunkObject, WeaviateClient};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A chunk retrieved from the vector store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetrievedDoc {
    /// Chunk text.
    pub content: String,
    /// Chunk-level source id (`<file>_<page>`).
    pub source: String,
    /// Zero-based page number within the report.
    #[serde(default)]
    pub page: Option<i64>,
    /// File path of the originating report.
    #[serde(default)]
    pub file: Option<String>,
}

/// Errors from the retrieval layer.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The HTTP request itself failed.
    #[error("retrieval request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// A request body could not be encoded.
    #[error("retrieval encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    /// The remote endpoint URL is invalid.
    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),
    /// The response did not have the expected shape.
    #[error("unexpected retrieval response: {0}")]
    Response(String),
}

/// Trait for document retrievers.
#[async_trait::async_trait]
pub trait Retriever: Send + Sync {
    /// Retrieve the top-`k` chunks for a query.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding the query or searching the store fails.
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedDoc>, RetrievalError>;
}

/// Embeds queries and searches the Weaviate class by vector.
#[derive(Debug)]
pub struct VectorRetriever {
    embedder: EmbeddingsClient,
    store: WeaviateClient,
}

impl VectorRetriever {
    /// Create a retriever over the given embedder and store.
    #[must_use]
    pub fn new(embedder: EmbeddingsClient, store: WeaviateClient) -> Self {
        Self { embedder, store }
    }
}

#[async_trait::async_trait]
impl Retriever for VectorRetriever {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedDoc>, RetrievalError> {
        let mut vectors = self.embedder.embed(&[query.to_string()]).await?;
        let vector = vectors
            .pop()
            .ok_or_else(|| RetrievalError::Response("no embedding returned for query".to_string()))?;

        let docs = self.store.search(&vector, k).await?;
        tracing::debug!(query_len = query.len(), hits = docs.len(), "vector search complete");
        Ok(docs)
    }
}
