//! Report metadata registry and source attribution.
//!
//! `reports_metadata.json` describes the ingested CMHC reports (display
//! name, author, publication date) keyed by file name. Retrieved chunks
//! carry the file path they came from, prefixed with the reports directory;
//! lookups strip that prefix before hitting the registry.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::retrieval::RetrievedDoc;

/// Path prefix stored on ingested chunks, stripped for metadata lookup.
const FILE_PREFIX: &str = "reports/";

/// One record from `reports_metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportRecord {
    /// File name of the report (registry key).
    pub file: String,
    /// Display name of the report.
    #[serde(default)]
    pub name: Option<String>,
    /// Report author.
    #[serde(default)]
    pub author: Option<String>,
    /// Publication date as free-form text.
    #[serde(default)]
    pub date_published: Option<String>,
}

/// Source attribution sent to the client alongside the answer stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceInfo {
    /// Chunk-level source id (`<file>_<page>`).
    pub source: String,
    /// File path of the originating report.
    pub file: String,
    /// Display name from the registry, if known.
    pub name: Option<String>,
    /// Author from the registry, if known.
    pub author: Option<String>,
    /// Publication date from the registry, if known.
    pub date_published: Option<String>,
}

/// In-memory index of report metadata.
#[derive(Debug, Clone, Default)]
pub struct ReportRegistry {
    by_file: HashMap<String, ReportRecord>,
}

impl ReportRegistry {
    /// Load the registry from a JSON file containing a list of records.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let records: Vec<ReportRecord> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Self::from_records(records))
    }

    /// Build a registry from in-memory records.
    #[must_use]
    pub fn from_records(records: Vec<ReportRecord>) -> Self {
        let by_file = records.into_iter().map(|r| (r.file.clone(), r)).collect();
        Self { by_file }
    }

    /// Number of known reports.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_file.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_file.is_empty()
    }

    /// Look up a record by chunk file path, stripping the reports prefix.
    #[must_use]
    pub fn get(&self, file: &str) -> Option<&ReportRecord> {
        let key = file.strip_prefix(FILE_PREFIX).unwrap_or(file);
        self.by_file.get(key)
    }

    /// Build the source list for a set of retrieved chunks.
    ///
    /// Chunks without a `file` attribute are skipped, and chunks from the
    /// same `source` are reported once, in retrieval order.
    #[must_use]
    pub fn collect_sources(&self, docs: &[RetrievedDoc]) -> Vec<SourceInfo> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut sources = Vec::new();

        for doc in docs {
            let Some(file) = doc.file.as_deref().filter(|f| !f.is_empty()) else {
                continue;
            };
            if !seen.insert(doc.source.as_str()) {
                continue;
            }

            let record = self.get(file);
            sources.push(SourceInfo {
                source: doc.source.clone(),
                file: file.to_string(),
                name: record.and_then(|r| r.name.clone()),
                author: record.and_then(|r| r.author.clone()),
                date_published: record.and_then(|r| r.date_published.clone()),
            });
        }

        sources
    }
}
