use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::models::{SearchRequest, SearchResponse};
use crate::pipeline::RetrieveOptions;
use crate::state::AppState;

/// Upper bound on any per-request k or top_n.
pub const MAX_RESULTS: usize = 100;

/// POST /api/search - BM25 + vector retrieval, concatenated and reranked:
///   1. BM25 search (bm25_k)
///   2. Query embedding + vector search (vector_k)
///   3. Concatenate both lists (optionally dedup)
///   4. Rerank with NeMo Retriever and keep top_n (RRF when reranking is off)
pub async fn search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, (StatusCode, String)> {
    let query = req.query.trim().to_string();
    if query.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Query is required".to_string()));
    }

    let retrieval = &state.config.retrieval;
    let options = RetrieveOptions {
        top_n: clamp(req.top_n, state.config.reranker.top_n),
        bm25_k: clamp(req.bm25_k, retrieval.bm25_k),
        vector_k: clamp(req.vector_k, retrieval.vector_k),
        use_bm25: req.use_bm25,
        use_vector: req.use_vector,
        use_rerank: req.use_rerank,
        dedup: req.dedup,
        source_ids: req.source_ids,
    };

    let output = state
        .pipeline()
        .retrieve(&query, &options)
        .await
        .map_err(|e| {
            tracing::error!("Search failed for '{query}': {e:#}");
            (StatusCode::BAD_GATEWAY, format!("Search failed: {e:#}"))
        })?;

    Ok(Json(SearchResponse {
        query,
        total_bm25_hits: output.total_bm25_hits,
        total_vector_hits: output.total_vector_hits,
        candidates: output.candidates,
        results: output.ranked,
        ranked_by: output.ranked_by,
    }))
}

pub(crate) fn clamp(requested: Option<usize>, default: usize) -> usize {
    requested.unwrap_or(default).min(MAX_RESULTS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_uses_default() {
        assert_eq!(clamp(None, 5), 5);
    }

    #[test]
    fn test_clamp_caps_large_values() {
        assert_eq!(clamp(Some(10_000), 5), MAX_RESULTS);
        assert_eq!(clamp(Some(0), 5), 0);
    }
}
