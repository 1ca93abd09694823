//! Weaviate HTTP client.
//!
//! Search goes through the GraphQL endpoint (`Get` with `nearVector`);
//! schema management and batch inserts use the REST API. Vectors are
//! supplied by us, so the class is created with `vectorizer: none`.

use reqwest::StatusCode;
use serde_json::{Value, json};
use url::Url;

use super::{RetrievalError, RetrievedDoc};
use crate::config::WeaviateConfig;

/// A chunk to index, with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkObject {
    /// Chunk text.
    pub text: String,
    /// Chunk-level source id (`<file>_<page>`).
    pub source: String,
    /// Zero-based page number within the report.
    pub page: i64,
    /// File path of the originating report.
    pub file: String,
    /// Embedding vector.
    pub vector: Vec<f32>,
}

/// Client for one Weaviate class.
#[derive(Clone)]
pub struct WeaviateClient {
    http: reqwest::Client,
    base: Url,
    api_key: Option<String>,
    class: String,
}

impl std::fmt::Debug for WeaviateClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeaviateClient")
            .field("base", &self.base.as_str())
            .field("class", &self.class)
            .finish()
    }
}

impl WeaviateClient {
    /// Create a client from the Weaviate configuration section.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured URL is invalid.
    pub fn new(config: &WeaviateConfig) -> Result<Self, RetrievalError> {
        let base = Url::parse(&config.url)?;
        let api_key = Some(config.api_key.clone()).filter(|k| !k.trim().is_empty());
        Ok(Self {
            http: reqwest::Client::new(),
            base,
            api_key,
            class: config.index.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base.as_str().trim_end_matches('/'))
    }

    fn authed(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => rb.bearer_auth(key),
            None => rb,
        }
    }

    /// Search the class by vector, returning up to `limit` chunks.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the GraphQL response
    /// reports errors.
    pub async fn search(
        &self,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievedDoc>, RetrievalError> {
        let vector_json = serde_json::to_string(vector)?;
        let query = format!(
            "{{ Get {{ {class}(limit: {limit}, nearVector: {{vector: {vector_json}}}) \
             {{ text source page file }} }} }}",
            class = self.class
        );

        let resp = self
            .authed(self.http.post(self.endpoint("/v1/graphql")))
            .json(&json!({ "query": query }))
            .send()
            .await?
            .error_for_status()?;

        let v: Value = resp.json().await?;
        if let Some(errors) = v.get("errors") {
            return Err(RetrievalError::Response(format!(
                "graphql errors: {errors}"
            )));
        }

        let hits = v
            .pointer(&format!("/data/Get/{}", self.class))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(hits.iter().map(parse_hit).collect())
    }

    /// Drop and recreate the class (full-cleanup indexing).
    ///
    /// # Errors
    ///
    /// Returns an error if dropping or recreating the class fails. A
    /// missing class on drop is not an error.
    pub async fn reset_class(&self) -> Result<(), RetrievalError> {
        let path = format!("/v1/schema/{}", self.class);
        let resp = self
            .authed(self.http.delete(self.endpoint(&path)))
            .send()
            .await?;
        if !resp.status().is_success() && resp.status() != StatusCode::NOT_FOUND {
            return Err(RetrievalError::Response(format!(
                "failed to drop class {}: {}",
                self.class,
                resp.status()
            )));
        }

        let schema = json!({
            "class": self.class,
            "vectorizer": "none",
            "properties": [
                { "name": "text",   "dataType": ["text"] },
                { "name": "source", "dataType": ["text"] },
                { "name": "page",   "dataType": ["int"] },
                { "name": "file",   "dataType": ["text"] },
            ],
        });
        self.authed(self.http.post(self.endpoint("/v1/schema")))
            .json(&schema)
            .send()
            .await?
            .error_for_status()?;

        tracing::info!(class = %self.class, "recreated weaviate class");
        Ok(())
    }

    /// Insert a batch of chunk objects with their vectors.
    ///
    /// Returns the number of objects accepted by the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch request fails.
    pub async fn insert_batch(&self, objects: &[ChunkObject]) -> Result<usize, RetrievalError> {
        if objects.is_empty() {
            return Ok(0);
        }

        let body = json!({
            "objects": objects
                .iter()
                .map(|o| json!({
                    "class": self.class,
                    "properties": {
                        "text": o.text,
                        "source": o.source,
                        "page": o.page,
                        "file": o.file,
                    },
                    "vector": o.vector,
                }))
                .collect::<Vec<_>>(),
        });

        let resp = self
            .authed(self.http.post(self.endpoint("/v1/batch/objects")))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        // Batch responses are 200 even when individual objects fail.
        let v: Value = resp.json().await?;
        let mut accepted = objects.len();
        if let Some(results) = v.as_array() {
            for result in results {
                if let Some(errors) = result.pointer("/result/errors")
                    && !errors.is_null()
                {
                    accepted = accepted.saturating_sub(1);
                    tracing::warn!(errors = %errors, "weaviate rejected batch object");
                }
            }
        }

        Ok(accepted)
    }
}

fn parse_hit(hit: &Value) -> RetrievedDoc {
    RetrievedDoc {
        content: hit
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        source: hit
            .get("source")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        page: hit
            .get("page")
            .and_then(|p| p.as_i64().or_else(|| p.as_f64().map(|f| f as i64))),
        file: hit
            .get("file")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_graphql_hit() {
        let hit = json!({
            "text": "Vacancy rates fell to 1.5%.",
            "source": "reports/rental.pdf_3",
            "page": 3.0,
            "file": "reports/rental.pdf",
        });
        let doc = parse_hit(&hit);
        assert_eq!(doc.content, "Vacancy rates fell to 1.5%.");
        assert_eq!(doc.page, Some(3));
        assert_eq!(doc.file.as_deref(), Some("reports/rental.pdf"));
    }

    #[test]
    fn missing_file_maps_to_none() {
        let doc = parse_hit(&json!({ "text": "x", "source": "s", "file": "" }));
        assert!(doc.file.is_none());
        assert!(doc.page.is_none());
    }
}
