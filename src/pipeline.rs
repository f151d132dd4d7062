//! The retrieval flow behind `/api/search` and `/api/ask`.
//!
//! ```text
//!   query ──┬── BM25 (bm25_k) ───────────────┐
//!           └── embed ── vector (vector_k) ──┴── concatenate ── rerank ── top_n
//! ```
//!
//! Without a reranker, the two hit lists are fused locally with RRF instead.

use anyhow::{Context, Result};
use std::sync::Arc;
use uuid::Uuid;

use crate::llm::embeddings::Embedder;
use crate::llm::rerank::{compress, Reranker};
use crate::models::{Candidate, RankedDocument};
use crate::search::bm25::{Bm25Hit, Bm25Index};
use crate::search::combine::{concatenate, dedup_candidates, rrf_fusion, RRF_K};
use crate::search::vector::{VectorHit, VectorStore};

/// Reported in `ranked_by` when results come from local fusion.
pub const RRF_RANKER: &str = "rrf";

#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    pub top_n: usize,
    pub bm25_k: usize,
    pub vector_k: usize,
    pub use_bm25: bool,
    pub use_vector: bool,
    pub use_rerank: bool,
    pub dedup: bool,
    pub source_ids: Option<Vec<Uuid>>,
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        Self {
            top_n: 5,
            bm25_k: 10,
            vector_k: 10,
            use_bm25: true,
            use_vector: true,
            use_rerank: true,
            dedup: false,
            source_ids: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineOutput {
    pub total_bm25_hits: usize,
    pub total_vector_hits: usize,
    /// Concatenated list handed to the reranker
    pub candidates: Vec<Candidate>,
    /// At most `top_n` documents, best first
    pub ranked: Vec<RankedDocument>,
    pub ranked_by: String,
}

#[derive(Clone)]
pub struct RetrievalPipeline {
    bm25: Arc<Bm25Index>,
    vectors: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
    reranker: Option<Arc<dyn Reranker>>,
}

impl RetrievalPipeline {
    pub fn new(
        bm25: Arc<Bm25Index>,
        vectors: Arc<VectorStore>,
        embedder: Arc<dyn Embedder>,
        reranker: Option<Arc<dyn Reranker>>,
    ) -> Self {
        Self {
            bm25,
            vectors,
            embedder,
            reranker,
        }
    }

    pub async fn retrieve(&self, query: &str, options: &RetrieveOptions) -> Result<PipelineOutput> {
        let query = query.trim();
        if query.is_empty() {
            anyhow::bail!("Query is required");
        }
        let source_ids = options.source_ids.as_deref();

        let bm25_hits = if options.use_bm25 {
            self.search_bm25(query, options.bm25_k, options.source_ids.clone())
                .await?
        } else {
            Vec::new()
        };

        let vector_hits = if options.use_vector {
            self.search_vectors(query, options.vector_k, source_ids)
                .await?
        } else {
            Vec::new()
        };

        tracing::debug!(
            "Retrieved {} BM25 hits and {} vector hits for '{query}'",
            bm25_hits.len(),
            vector_hits.len()
        );

        let mut candidates = concatenate(&bm25_hits, &vector_hits);
        if options.dedup {
            candidates = dedup_candidates(candidates);
        }

        let reranker = self.reranker.as_ref().filter(|_| options.use_rerank);
        let ranked_by = reranker.map_or(RRF_RANKER, |r| r.name()).to_string();

        let ranked = if candidates.is_empty() {
            Vec::new()
        } else if let Some(reranker) = reranker {
            let ranked = compress(reranker.as_ref(), query, &candidates, options.top_n).await?;
            tracing::info!(
                "{} kept {} of {} candidates",
                reranker.name(),
                ranked.len(),
                candidates.len()
            );
            ranked
        } else {
            fused_ranking(&bm25_hits, &vector_hits, options.top_n)
        };

        Ok(PipelineOutput {
            total_bm25_hits: bm25_hits.len(),
            total_vector_hits: vector_hits.len(),
            candidates,
            ranked,
            ranked_by,
        })
    }

    async fn search_bm25(
        &self,
        query: &str,
        limit: usize,
        source_ids: Option<Vec<Uuid>>,
    ) -> Result<Vec<Bm25Hit>> {
        let bm25 = self.bm25.clone();
        let query = query.to_string();
        tokio::task::spawn_blocking(move || bm25.search(&query, limit, source_ids.as_deref()))
            .await
            .context("BM25 search task failed")?
    }

    async fn search_vectors(
        &self,
        query: &str,
        limit: usize,
        source_ids: Option<&[Uuid]>,
    ) -> Result<Vec<VectorHit>> {
        // Nothing to compare against, so don't spend an embedding call
        if limit == 0 || self.vectors.entry_count() == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = self
            .embedder
            .embed_query(query)
            .await
            .context("Failed to embed query")?;
        self.vectors.search(&query_embedding, limit, source_ids)
    }
}

/// RRF results as ranked documents. `score` is the fused score relative to a
/// document ranked first by both stores.
fn fused_ranking(bm25_hits: &[Bm25Hit], vector_hits: &[VectorHit], top_n: usize) -> Vec<RankedDocument> {
    let best = 2.0 / (RRF_K + 1.0);
    rrf_fusion(bm25_hits, vector_hits, top_n)
        .into_iter()
        .enumerate()
        .map(|(i, (candidate, fused))| RankedDocument {
            rank: i + 1,
            relevance_score: fused,
            score: (fused / best).min(1.0),
            candidate,
        })
        .collect()
}
