//! Character-based chunking for report pages.

use anyhow::Result;
use text_splitter::{Characters, ChunkConfig, TextSplitter};

/// Splits page text into overlapping chunks on semantic boundaries.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    /// Create a chunker with the given target size and overlap, both in
    /// characters.
    #[must_use]
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size,
            overlap,
        }
    }

    /// Split text into chunks.
    ///
    /// # Errors
    ///
    /// Returns an error if the overlap is not smaller than the chunk size.
    pub fn chunk(&self, text: &str) -> Result<Vec<String>> {
        let config = ChunkConfig::new(self.chunk_size)
            .with_sizer(Characters)
            .with_trim(true)
            .with_overlap(self.overlap)?;
        let splitter = TextSplitter::new(config);
        Ok(splitter.chunks(text).map(ToString::to_string).collect())
    }
}
