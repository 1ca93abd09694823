//! OpenAI embeddings client.

use serde_json::Value;

use super::RetrievalError;
use crate::config::OpenAiConfig;

/// Client for the OpenAI embeddings API (`/v1/embeddings`).
#[derive(Clone)]
pub struct EmbeddingsClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    batch_size: usize,
}

impl std::fmt::Debug for EmbeddingsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingsClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl EmbeddingsClient {
    /// Create a client from the OpenAI configuration section.
    #[must_use]
    pub fn new(config: &OpenAiConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            model: config.embedding_model.clone(),
            batch_size: config.embed_batch_size.max(1),
        }
    }

    /// Embed a list of texts, batching requests to the configured size.
    ///
    /// The returned vectors are in input order.
    ///
    /// # Errors
    ///
    /// Returns an error if a request fails or a response is malformed.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let url = format!("{}/v1/embeddings", self.base_url.trim_end_matches('/'));
        let mut out = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            let body = serde_json::json!({
                "model": self.model,
                "input": batch,
            });
            let resp = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await?
                .error_for_status()?;

            let v: Value = resp.json().await?;
            let data = v.get("data").and_then(Value::as_array).ok_or_else(|| {
                RetrievalError::Response("embeddings response missing data array".to_string())
            })?;
            if data.len() != batch.len() {
                return Err(RetrievalError::Response(format!(
                    "embeddings response has {} entries for {} inputs",
                    data.len(),
                    batch.len()
                )));
            }

            for item in data {
                let embedding = item
                    .get("embedding")
                    .and_then(Value::as_array)
                    .ok_or_else(|| {
                        RetrievalError::Response("embeddings entry missing vector".to_string())
                    })?;
                out.push(
                    embedding
                        .iter()
                        .filter_map(Value::as_f64)
                        .map(|f| f as f32)
                        .collect(),
                );
            }
        }

        Ok(out)
    }
}
