//! LangSmith API client.
//!
//! Records chain runs and handles the feedback endpoints and trace-URL
//! resolution. Freshly finished runs may not be visible on the API yet,
//! so trace resolution polls the run before sharing it.

use std::time::Duration;

use chrono::Utc;
use reqwest::{Method, StatusCode};
use serde_json::{Value, json};

use crate::config::LangSmithConfig;

/// Attempts to read a run before giving up on waiting for it.
const TRACE_READ_ATTEMPTS: u32 = 5;

/// Delay between run read attempts.
const TRACE_READ_DELAY: Duration = Duration::from_secs(1);

/// Run name under which chain runs are recorded.
const RUN_NAME: &str = "chmc-chat";

/// Records the lifecycle of a chain run.
///
/// The answer chain reports runs through this seam so the run ids it
/// streams to clients refer to runs that feedback and trace sharing can
/// resolve.
#[async_trait::async_trait]
pub trait RunTracer: Send + Sync {
    /// Record that a run started with the given question.
    async fn run_started(&self, run_id: &str, question: &str) -> anyhow::Result<()>;

    /// Record that a run finished, with the answer or an error.
    async fn run_ended(
        &self,
        run_id: &str,
        answer: &str,
        error: Option<&str>,
    ) -> anyhow::Result<()>;
}

/// Client for the LangSmith REST API.
#[derive(Clone)]
pub struct LangSmithClient {
    http: reqwest::Client,
    base_url: String,
    hostname: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for LangSmithClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LangSmithClient")
            .field("base_url", &self.base_url)
            .field("hostname", &self.hostname)
            .finish()
    }
}

impl LangSmithClient {
    /// Create a client from the LangSmith configuration section.
    #[must_use]
    pub fn new(config: &LangSmithConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            hostname: config.hostname.trim_end_matches('/').to_string(),
            api_key: Some(config.api_key.clone()).filter(|k| !k.trim().is_empty()),
        }
    }

    /// Whether an API key is configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let rb = self.http.request(method, format!("{}{path}", self.base_url));
        match &self.api_key {
            Some(key) => rb.header("x-api-key", key),
            None => rb,
        }
    }

    /// Register a chain run so feedback and trace sharing can resolve it.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn create_run(&self, run_id: &str, question: &str) -> anyhow::Result<()> {
        self.request(Method::POST, "/runs")
            .json(&create_run_body(run_id, question))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Close a run with its outputs, or an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn update_run(
        &self,
        run_id: &str,
        answer: &str,
        error: Option<&str>,
    ) -> anyhow::Result<()> {
        self.request(Method::PATCH, &format!("/runs/{run_id}"))
            .json(&update_run_body(answer, error))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Record feedback for a run.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn create_feedback(
        &self,
        run_id: &str,
        key: &str,
        score: Option<Value>,
        comment: Option<&str>,
    ) -> anyhow::Result<()> {
        let body = json!({
            "run_id": run_id,
            "key": key,
            "score": score,
            "comment": comment,
            "created_at": Utc::now().to_rfc3339(),
        });
        self.request(Method::POST, "/feedback")
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Patch an existing feedback entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn update_feedback(
        &self,
        feedback_id: &str,
        score: Option<Value>,
        comment: Option<&str>,
    ) -> anyhow::Result<()> {
        let body = json!({
            "score": score,
            "comment": comment,
        });
        self.request(Method::PATCH, &format!("/feedback/{feedback_id}"))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Read a run by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the run is not readable yet.
    pub async fn read_run(&self, run_id: &str) -> anyhow::Result<Value> {
        let v = self
            .request(Method::GET, &format!("/runs/{run_id}"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(v)
    }

    /// Return the existing shared link for a run, if any.
    async fn shared_link(&self, run_id: &str) -> anyhow::Result<Option<String>> {
        let resp = self
            .request(Method::GET, &format!("/runs/{run_id}/share"))
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let v: Value = resp.error_for_status()?.json().await?;
        Ok(v.get("share_token")
            .and_then(Value::as_str)
            .map(|token| self.public_url(token)))
    }

    /// Share a run and return the public link.
    async fn share_run(&self, run_id: &str) -> anyhow::Result<String> {
        let v: Value = self
            .request(Method::PUT, &format!("/runs/{run_id}/share"))
            .json(&json!({}))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let token = v
            .get("share_token")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("share response missing share_token"))?;
        Ok(self.public_url(token))
    }

    fn public_url(&self, token: &str) -> String {
        format!("{}/public/{token}/r", self.hostname)
    }

    /// Resolve the shareable trace URL for a run, waiting for the run to
    /// become visible first.
    ///
    /// # Errors
    ///
    /// Returns an error if sharing the run fails.
    pub async fn trace_url(&self, run_id: &str) -> anyhow::Result<String> {
        for attempt in 0..TRACE_READ_ATTEMPTS {
            match self.read_run(run_id).await {
                Ok(_) => break,
                Err(e) => {
                    tracing::debug!(
                        run_id = %run_id,
                        attempt = attempt + 1,
                        error = %e,
                        "run not readable yet"
                    );
                    tokio::time::sleep(TRACE_READ_DELAY).await;
                }
            }
        }

        if let Some(url) = self.shared_link(run_id).await? {
            return Ok(url);
        }
        self.share_run(run_id).await
    }
}

#[async_trait::async_trait]
impl RunTracer for LangSmithClient {
    async fn run_started(&self, run_id: &str, question: &str) -> anyhow::Result<()> {
        self.create_run(run_id, question).await
    }

    async fn run_ended(
        &self,
        run_id: &str,
        answer: &str,
        error: Option<&str>,
    ) -> anyhow::Result<()> {
        self.update_run(run_id, answer, error).await
    }
}

fn create_run_body(run_id: &str, question: &str) -> Value {
    json!({
        "id": run_id,
        "name": RUN_NAME,
        "run_type": "chain",
        "inputs": { "question": question },
        "start_time": Utc::now().to_rfc3339(),
    })
}

fn update_run_body(answer: &str, error: Option<&str>) -> Value {
    json!({
        "outputs": { "answer": answer },
        "error": error,
        "end_time": Utc::now().to_rfc3339(),
    })
}
