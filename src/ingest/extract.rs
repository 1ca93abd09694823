//! Document text extraction.
//!
//! Extraction goes through a factory keyed on MIME type: plain text and
//! markdown are read locally, while binary formats (PDF) are delegated to
//! an HTTP extraction service when one is configured.

use std::path::Path;

use anyhow::Context;
use serde_json::Value;

/// A document's extracted text, one entry per page.
///
/// Formats without page structure yield a single page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDocument {
    /// Page texts in document order.
    pub pages: Vec<String>,
}

/// Trait for per-format text extractors.
#[async_trait::async_trait]
pub trait DocumentExtractor: Send + Sync {
    /// Whether this extractor handles the given MIME essence.
    fn supports(&self, mime: &str) -> bool;

    /// Extract the document at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or extraction fails.
    async fn extract(&self, path: &Path) -> anyhow::Result<ExtractedDocument>;
}

/// Reads text-like files directly from disk.
///
/// Form feeds are treated as page breaks, matching the convention used by
/// text dumps of paginated reports.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTextExtractor;

#[async_trait::async_trait]
impl DocumentExtractor for LocalTextExtractor {
    fn supports(&self, mime: &str) -> bool {
        mime.starts_with("text/")
    }

    async fn extract(&self, path: &Path) -> anyhow::Result<ExtractedDocument> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let pages: Vec<String> = raw
            .split('\u{0c}')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(ToString::to_string)
            .collect();
        Ok(ExtractedDocument { pages })
    }
}

/// Delegates extraction to an HTTP service.
///
/// The service receives the raw file bytes and responds with
/// `{"pages": [...]}`, or `{"text": "..."}` for unpaginated formats.
#[derive(Clone)]
pub struct RemoteExtractor {
    http: reqwest::Client,
    endpoint: String,
}

impl std::fmt::Debug for RemoteExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteExtractor")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl RemoteExtractor {
    /// Create a remote extractor against the given endpoint.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait::async_trait]
impl DocumentExtractor for RemoteExtractor {
    fn supports(&self, mime: &str) -> bool {
        mime == "application/pdf"
    }

    async fn extract(&self, path: &Path) -> anyhow::Result<ExtractedDocument> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mime = mime_guess::from_path(path).first_or_octet_stream();

        let resp = self
            .http
            .post(&self.endpoint)
            .query(&[("filename", filename.as_str())])
            .header("Content-Type", mime.essence_str())
            .body(bytes)
            .send()
            .await?
            .error_for_status()?;

        let v: Value = resp.json().await?;
        if let Some(pages) = v.get("pages").and_then(Value::as_array) {
            let pages = pages
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect();
            return Ok(ExtractedDocument { pages });
        }
        if let Some(text) = v.get("text").and_then(Value::as_str) {
            return Ok(ExtractedDocument {
                pages: vec![text.to_string()],
            });
        }
        anyhow::bail!("extraction service returned neither pages nor text")
    }
}

/// Picks an extractor for a file by MIME type.
#[derive(Debug, Default)]
pub struct ExtractorFactory {
    local: LocalTextExtractor,
    remote: Option<RemoteExtractor>,
}

impl ExtractorFactory {
    /// Build a factory; `extractor_url` enables the remote backend when
    /// non-empty.
    #[must_use]
    pub fn new(extractor_url: &str) -> Self {
        let remote = Some(extractor_url.trim())
            .filter(|u| !u.is_empty())
            .map(RemoteExtractor::new);
        Self {
            local: LocalTextExtractor,
            remote,
        }
    }

    /// Return the extractor for a path, if any backend supports it.
    #[must_use]
    pub fn for_path(&self, path: &Path) -> Option<&dyn DocumentExtractor> {
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        let essence = mime.essence_str();

        if self.local.supports(essence) {
            return Some(&self.local);
        }
        self.remote
            .as_ref()
            .and_then(|r| r.supports(essence).then_some(r as &dyn DocumentExtractor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn local_extractor_splits_on_form_feeds() {
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        write!(file, "page one\u{0c}page two\u{0c}").unwrap();

        let doc = LocalTextExtractor.extract(file.path()).await.unwrap();
        assert_eq!(doc.pages, vec!["page one".to_string(), "page two".to_string()]);
    }

    #[test]
    fn factory_routes_by_mime() {
        let with_remote = ExtractorFactory::new("http://localhost:9000/extract");
        assert!(with_remote.for_path(Path::new("report.txt")).is_some());
        assert!(with_remote.for_path(Path::new("report.pdf")).is_some());
        assert!(with_remote.for_path(Path::new("report.bin")).is_none());

        let local_only = ExtractorFactory::new("");
        assert!(local_only.for_path(Path::new("report.md")).is_some());
        assert!(local_only.for_path(Path::new("report.pdf")).is_none());
    }
}
