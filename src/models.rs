use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// A tracked document source (a directory on disk or a pasted text)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub name: String,
    pub origin: SourceOrigin,
    pub status: SourceStatus,
    pub added_at: DateTime<Utc>,
    pub indexed_at: Option<DateTime<Utc>>,
    pub document_count: usize,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SourceOrigin {
    Directory { path: PathBuf },
    Text { content: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Loading,
    Indexing,
    Embedding,
    Ready,
    Error(String),
}

/// A single indexed document chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub source_id: Uuid,
    pub doc_path: String,
    pub chunk_index: usize,
    pub content: String,
    pub kind: String,
    pub start_line: usize,
    pub end_line: usize,
}

/// Which store produced a candidate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Retriever {
    Bm25,
    Vector,
}

/// A retrieved document before reranking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub source_id: Uuid,
    pub source_name: String,
    pub doc_path: String,
    pub chunk_index: usize,
    pub content: String,
    pub kind: String,
    pub start_line: usize,
    pub end_line: usize,
    pub retriever: Retriever,
    /// Score assigned by the store that produced this candidate
    pub store_score: f32,
    /// Other stores that returned the same chunk (only filled after dedup)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub also_from: Vec<Retriever>,
}

/// A candidate that survived reranking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedDocument {
    /// 1-based rank after reranking
    pub rank: usize,
    /// Raw relevance logit (or fused score when reranking is off)
    pub relevance_score: f32,
    /// Relevance normalized to 0-1
    pub score: f32,
    #[serde(flatten)]
    pub candidate: Candidate,
}

/// Add-source request: exactly one of `path` or `text` must be set
#[derive(Debug, Clone, Deserialize)]
pub struct AddSourceRequest {
    pub name: Option<String>,
    pub path: Option<PathBuf>,
    pub text: Option<String>,
}

/// Search request
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    /// Overrides the configured reranker top_n
    pub top_n: Option<usize>,
    pub bm25_k: Option<usize>,
    pub vector_k: Option<usize>,
    #[serde(default = "default_true")]
    pub use_bm25: bool,
    #[serde(default = "default_true")]
    pub use_vector: bool,
    #[serde(default = "default_true")]
    pub use_rerank: bool,
    #[serde(default)]
    pub dedup: bool,
    /// Filter by source IDs
    pub source_ids: Option<Vec<Uuid>>,
}

fn default_true() -> bool {
    true
}

/// Search response
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub total_bm25_hits: usize,
    pub total_vector_hits: usize,
    /// The concatenated list that was sent to the reranker
    pub candidates: Vec<Candidate>,
    pub results: Vec<RankedDocument>,
    /// Name of the reranker used, or "rrf" for the local fallback
    pub ranked_by: String,
}

/// Ask request: retrieval options plus the question
#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
    pub question: String,
    pub top_n: Option<usize>,
    pub source_ids: Option<Vec<Uuid>>,
}

/// Source reference returned with an answer
#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub index: usize,
    pub source_name: String,
    pub doc_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub question: String,
    pub answer: String,
    pub citations: Vec<Citation>,
}
