use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::llm::embeddings::{Embedder, HttpEmbedder};
use crate::llm::rerank::{NimReranker, Reranker};
use crate::models::Source;
use crate::pipeline::RetrievalPipeline;
use crate::search::bm25::Bm25Index;
use crate::search::vector::VectorStore;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub sources: Arc<RwLock<Vec<Source>>>,
    pub bm25: Arc<Bm25Index>,
    pub vectors: Arc<VectorStore>,
    pub http_client: reqwest::Client,
    pub embedder: Arc<dyn Embedder>,
    /// None when reranking is disabled or misconfigured; search then uses RRF.
    pub reranker: Option<Arc<dyn Reranker>>,
    pub ingest_semaphore: Arc<tokio::sync::Semaphore>,
}

impl AppState {
    /// Open the stores under `config.data_dir` and build the HTTP-backed services.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()?;

        let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(
            http_client.clone(),
            config.embedding.clone(),
        ));
        let reranker = build_reranker(&config)?;

        Self::with_services(config, http_client, embedder, reranker)
    }

    /// Like [`AppState::new`] but with caller-provided embedder and reranker.
    pub fn with_services(
        config: Config,
        http_client: reqwest::Client,
        embedder: Arc<dyn Embedder>,
        reranker: Option<Arc<dyn Reranker>>,
    ) -> anyhow::Result<Self> {
        std::fs::create_dir_all(config.index_dir())?;
        std::fs::create_dir_all(config.vector_dir())?;

        let sources = load_sources(&config);
        let bm25 = Bm25Index::open_or_create(&config.index_dir())?;
        let vectors =
            VectorStore::open_or_create_with_limit(&config.vector_dir(), config.max_vector_entries)?;
        let max_ingests = config.max_concurrent_ingests.max(1);

        Ok(Self {
            config,
            sources: Arc::new(RwLock::new(sources)),
            bm25: Arc::new(bm25),
            vectors: Arc::new(vectors),
            http_client,
            embedder,
            reranker,
            ingest_semaphore: Arc::new(tokio::sync::Semaphore::new(max_ingests)),
        })
    }

    pub fn pipeline(&self) -> RetrievalPipeline {
        RetrievalPipeline::new(
            self.bm25.clone(),
            self.vectors.clone(),
            self.embedder.clone(),
            self.reranker.clone(),
        )
    }

    /// Persist the source list to disk (atomic write via temp file + rename).
    pub fn persist_sources(&self) {
        let sources = self.sources.read();
        let data = match serde_json::to_string_pretty(&*sources) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!("Failed to serialize sources: {e}");
                return;
            }
        };
        drop(sources);

        let db_path = self.config.db_path();
        let tmp_path = db_path.with_extension("json.tmp");
        if let Err(e) = std::fs::write(&tmp_path, &data).and_then(|_| std::fs::rename(&tmp_path, &db_path)) {
            tracing::error!("Failed to persist {}: {e}", db_path.display());
        }
    }
}

fn load_sources(config: &Config) -> Vec<Source> {
    let path = config.db_path();
    let Ok(data) = std::fs::read_to_string(&path) else {
        return Vec::new();
    };
    match serde_json::from_str(&data) {
        Ok(sources) => sources,
        Err(e) => {
            tracing::warn!("Ignoring unreadable {}: {e}", path.display());
            Vec::new()
        }
    }
}

/// The reranker is optional: a missing URL disables it, and an unusable config
/// (e.g. hosted endpoint without a key) is logged and disabled.
fn build_reranker(config: &Config) -> anyhow::Result<Option<Arc<dyn Reranker>>> {
    if config.reranker.base_url.is_none() {
        tracing::info!("Reranker disabled; search results are fused with RRF");
        return Ok(None);
    }

    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(config.reranker.timeout_secs))
        .build()?;

    match NimReranker::new(client, config.reranker.clone()) {
        Ok(reranker) => {
            tracing::info!(
                "Reranking with {} at {}",
                config.reranker.model,
                reranker.endpoint()
            );
            Ok(Some(Arc::new(reranker)))
        }
        Err(e) => {
            tracing::warn!("Reranker unavailable, falling back to RRF: {e}");
            Ok(None)
        }
    }
}
