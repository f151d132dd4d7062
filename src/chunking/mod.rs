//! Document chunking: a recursive character splitter with line tracking.

pub mod splitter;

use uuid::Uuid;

use crate::models::DocumentChunk;

/// Output of the chunking process.
#[derive(Debug, Clone)]
pub struct ChunkOutput {
    pub content: String,
    /// 1-based start line in the original document.
    pub start_line: usize,
    /// 1-based end line in the original document.
    pub end_line: usize,
}

pub use splitter::split_text;

/// Split a document into indexed chunks belonging to `source_id`.
pub fn chunk_document(
    source_id: Uuid,
    doc_path: &str,
    content: &str,
    kind: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<DocumentChunk> {
    split_text(content, chunk_size, chunk_overlap)
        .into_iter()
        .enumerate()
        .map(|(i, c)| DocumentChunk {
            source_id,
            doc_path: doc_path.to_string(),
            chunk_index: i,
            content: c.content,
            kind: kind.to_string(),
            start_line: c.start_line,
            end_line: c.end_line,
        })
        .collect()
}
