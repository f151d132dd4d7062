use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

/// GET /api/config - Effective configuration with API keys redacted
pub async fn get_config(State(state): State<AppState>) -> Json<ConfigResponse> {
    let config = &state.config;
    Json(ConfigResponse {
        embedding: ServiceInfo {
            base_url: config.embedding.base_url.clone(),
            model: config.embedding.model.clone(),
            has_api_key: has_key(config.embedding.api_key.as_deref()),
        },
        reranker: RerankerInfo {
            enabled: state.reranker.is_some(),
            base_url: config.reranker.base_url.clone(),
            model: config.reranker.model.clone(),
            has_api_key: has_key(config.reranker.api_key.as_deref()),
            top_n: config.reranker.top_n,
            max_batch_size: config.reranker.max_batch_size,
        },
        chat: ServiceInfo {
            base_url: config.chat.base_url.clone(),
            model: config.chat.model.clone(),
            has_api_key: has_key(config.chat.api_key.as_deref()),
        },
        bm25_k: config.retrieval.bm25_k,
        vector_k: config.retrieval.vector_k,
        chunk_size: config.retrieval.chunk_size,
        chunk_overlap: config.retrieval.chunk_overlap,
    })
}

/// GET /api/health - Liveness plus store sizes
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sources: state.sources.read().len(),
        bm25_documents: state.bm25.doc_count(),
        vector_entries: state.vectors.entry_count(),
        embedding_dimension: state.vectors.dimension(),
        reranker: state.reranker.as_ref().map(|r| format!("{} ({})", r.name(), r.model())),
    })
}

fn has_key(key: Option<&str>) -> bool {
    key.is_some_and(|k| !k.is_empty())
}

#[derive(Serialize)]
pub struct ServiceInfo {
    pub base_url: String,
    pub model: String,
    pub has_api_key: bool,
}

#[derive(Serialize)]
pub struct RerankerInfo {
    pub enabled: bool,
    pub base_url: Option<String>,
    pub model: String,
    pub has_api_key: bool,
    pub top_n: usize,
    pub max_batch_size: usize,
}

/// Config response with API keys redacted
#[derive(Serialize)]
pub struct ConfigResponse {
    pub embedding: ServiceInfo,
    pub reranker: RerankerInfo,
    pub chat: ServiceInfo,
    pub bm25_k: usize,
    pub vector_k: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub sources: usize,
    pub bm25_documents: u64,
    pub vector_entries: usize,
    pub embedding_dimension: Option<usize>,
    pub reranker: Option<String>,
}
