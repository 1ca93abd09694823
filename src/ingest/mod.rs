//! Report ingestion pipeline.
//!
//! Full-cleanup indexing: the Weaviate class is dropped and recreated,
//! then every report in the reports directory is extracted, chunked,
//! embedded and inserted. Each chunk carries the report's file path and a
//! `<file>_<page>` source id so answers can be attributed back to a page.

pub mod chunking;
pub mod extract;

use std::path::Path;

use anyhow::Result;
use walkdir::WalkDir;

use crate::retrieval::{ChunkObject, EmbeddingsClient, WeaviateClient};
use chunking::Chunker;
use extract::ExtractorFactory;

/// Objects per insert batch.
const INSERT_BATCH_SIZE: usize = 100;

/// Per-document ingestion counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentStats {
    /// File path of the report.
    pub file: String,
    /// Pages extracted.
    pub pages: usize,
    /// Chunks produced.
    pub chunks: usize,
}

/// Whole-run ingestion counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Documents successfully ingested.
    pub documents: usize,
    /// Total pages across all documents.
    pub pages: usize,
    /// Total chunks indexed.
    pub chunks: usize,
    /// Files skipped (unsupported format or extraction failure).
    pub skipped: usize,
    /// Per-document breakdown, in ingestion order.
    pub per_document: Vec<DocumentStats>,
}

/// Extracts, chunks, embeds and indexes the reports directory.
#[derive(Debug)]
pub struct IngestPipeline {
    extractors: ExtractorFactory,
    chunker: Chunker,
    embedder: EmbeddingsClient,
    store: WeaviateClient,
}

impl IngestPipeline {
    /// Assemble a pipeline from its parts.
    #[must_use]
    pub fn new(
        extractors: ExtractorFactory,
        chunker: Chunker,
        embedder: EmbeddingsClient,
        store: WeaviateClient,
    ) -> Self {
        Self {
            extractors,
            chunker,
            embedder,
            store,
        }
    }

    /// Run a full-cleanup ingestion of `reports_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the class reset, embedding or insertion fails.
    /// Individual documents that cannot be extracted are skipped and
    /// counted, not fatal.
    pub async fn run(&self, reports_dir: &Path) -> Result<IngestStats> {
        let mut files: Vec<_> = WalkDir::new(reports_dir)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .collect();
        files.sort();

        tracing::info!(
            dir = %reports_dir.display(),
            files = files.len(),
            "starting full-cleanup ingestion"
        );
        self.store.reset_class().await?;

        let mut stats = IngestStats::default();
        let mut pending: Vec<ChunkObject> = Vec::new();

        for path in files {
            let file = path.display().to_string();

            let Some(extractor) = self.extractors.for_path(&path) else {
                tracing::warn!(file = %file, "no extractor for file, skipping");
                stats.skipped += 1;
                continue;
            };
            let doc = match extractor.extract(&path).await {
                Ok(doc) => doc,
                Err(e) => {
                    tracing::warn!(file = %file, error = %e, "extraction failed, skipping");
                    stats.skipped += 1;
                    continue;
                }
            };

            let mut doc_chunks = 0;
            for (page, text) in doc.pages.iter().enumerate() {
                for chunk in self.chunker.chunk(text)? {
                    pending.push(ChunkObject {
                        text: chunk,
                        source: format!("{file}_{page}"),
                        page: page as i64,
                        file: file.clone(),
                        vector: Vec::new(),
                    });
                    doc_chunks += 1;
                }
            }

            tracing::info!(file = %file, pages = doc.pages.len(), chunks = doc_chunks, "extracted report");
            stats.documents += 1;
            stats.pages += doc.pages.len();
            stats.chunks += doc_chunks;
            stats.per_document.push(DocumentStats {
                file,
                pages: doc.pages.len(),
                chunks: doc_chunks,
            });
        }

        self.embed_and_insert(&mut pending).await?;

        tracing::info!(
            documents = stats.documents,
            pages = stats.pages,
            chunks = stats.chunks,
            skipped = stats.skipped,
            "ingestion complete"
        );
        Ok(stats)
    }

    async fn embed_and_insert(&self, pending: &mut [ChunkObject]) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = pending.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        for (chunk, vector) in pending.iter_mut().zip(vectors) {
            chunk.vector = vector;
        }

        let mut inserted = 0;
        for batch in pending.chunks(INSERT_BATCH_SIZE) {
            inserted += self.store.insert_batch(batch).await?;
        }
        tracing::info!(inserted, total = pending.len(), "indexed chunk batches");
        Ok(())
    }
}
