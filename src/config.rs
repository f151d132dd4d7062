use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Hosted NVIDIA API catalog (OpenAI-compatible embeddings + chat).
pub const NVIDIA_INTEGRATE_URL: &str = "https://integrate.api.nvidia.com/v1";
/// Hosted NeMo Retriever ranking endpoint.
pub const NVIDIA_RANKING_URL: &str = "https://ai.api.nvidia.com/v1/retrieval/nvidia/reranking";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where the BM25 index, vectors and source list are stored
    pub data_dir: PathBuf,
    /// Server bind address
    pub bind_addr: String,
    pub embedding: EmbeddingConfig,
    pub reranker: RerankerConfig,
    pub chat: ChatConfig,
    pub retrieval: RetrievalConfig,
    /// Maximum number of sources allowed
    pub max_sources: usize,
    /// Maximum concurrent ingest jobs
    pub max_concurrent_ingests: usize,
    /// Maximum total vector entries in memory (0 = unlimited)
    pub max_vector_entries: usize,
}

/// Embedding service. `provider` is "nvidia" (NeMo Retriever embedding NIM or the
/// hosted API catalog) or "ollama".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    /// NeMo truncation mode: "NONE", "START" or "END".
    pub truncate: String,
    pub batch_size: usize,
    /// Client-side character cap applied before sending.
    pub max_chars: usize,
}

/// NeMo Retriever reranking service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    /// Either a full ranking URL (ending in `/ranking` or `/reranking`) or the
    /// base URL of a self-hosted NIM (e.g. "http://localhost:8000/v1").
    /// If None, the pipeline falls back to local RRF fusion.
    pub base_url: Option<String>,
    pub model: String,
    pub api_key: Option<String>,
    /// Default number of documents kept after reranking.
    pub top_n: usize,
    /// NeMo truncation mode: "NONE" or "END".
    pub truncate: String,
    /// Maximum passages per ranking request.
    pub max_batch_size: usize,
    /// Request timeout in seconds (capped at 60).
    pub timeout_secs: u64,
}

/// Chat completion service used for answer generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Documents fetched from the BM25 store
    pub bm25_k: usize,
    /// Documents fetched from the vector store
    pub vector_k: usize,
    /// Splitter chunk size in characters
    pub chunk_size: usize,
    /// Splitter overlap in characters
    pub chunk_overlap: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            bind_addr: "127.0.0.1:9100".to_string(),
            embedding: EmbeddingConfig::default(),
            reranker: RerankerConfig::default(),
            chat: ChatConfig::default(),
            retrieval: RetrievalConfig::default(),
            max_sources: 100,
            max_concurrent_ingests: 2,
            max_vector_entries: 500_000,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "nvidia".to_string(),
            base_url: NVIDIA_INTEGRATE_URL.to_string(),
            model: "nvidia/nv-embedqa-e5-v5".to_string(),
            api_key: None,
            truncate: "END".to_string(),
            batch_size: 50,
            max_chars: 2_000,
        }
    }
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            base_url: Some(NVIDIA_RANKING_URL.to_string()),
            model: "nvidia/nv-rerankqa-mistral-4b-v3".to_string(),
            api_key: None,
            top_n: 5,
            truncate: "END".to_string(),
            max_batch_size: 32,
            timeout_secs: 30,
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: NVIDIA_INTEGRATE_URL.to_string(),
            model: "meta/llama-3.1-8b-instruct".to_string(),
            api_key: None,
            temperature: 0.2,
            max_tokens: 1024,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            bm25_k: 10,
            vector_k: 10,
            chunk_size: 800,
            chunk_overlap: 100,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source. `from_env` uses the
    /// process environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("NEMO_RAG_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(addr) = lookup("NEMO_RAG_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(v) = parse(&lookup, "NEMO_RAG_MAX_SOURCES") {
            config.max_sources = v;
        }
        if let Some(v) = parse(&lookup, "NEMO_RAG_MAX_CONCURRENT_INGESTS") {
            config.max_concurrent_ingests = v;
        }
        if let Some(v) = parse(&lookup, "NEMO_RAG_MAX_VECTOR_ENTRIES") {
            config.max_vector_entries = v;
        }

        // Shared key for every NVIDIA-hosted service, overridable per service below
        let shared_key = lookup("NVIDIA_API_KEY");
        config.embedding.api_key = shared_key.clone();
        config.reranker.api_key = shared_key.clone();
        config.chat.api_key = shared_key;

        // Embeddings
        if let Some(provider) = lookup("EMBEDDING_PROVIDER") {
            config.embedding.provider = provider;
        }
        if let Some(url) = lookup("EMBEDDING_BASE_URL") {
            config.embedding.base_url = url;
        }
        if let Some(model) = lookup("EMBEDDING_MODEL") {
            config.embedding.model = model;
        }
        if let Some(key) = lookup("EMBEDDING_API_KEY") {
            config.embedding.api_key = Some(key);
        }
        if let Some(truncate) = lookup("EMBEDDING_TRUNCATE") {
            config.embedding.truncate = truncate.to_uppercase();
        }
        if let Some(v) = parse(&lookup, "EMBEDDING_BATCH_SIZE") {
            config.embedding.batch_size = v;
        }

        // Reranker
        if let Some(url) = lookup("RERANKER_BASE_URL") {
            // An empty value disables remote reranking
            config.reranker.base_url = if url.trim().is_empty() { None } else { Some(url) };
        }
        if let Some(model) = lookup("RERANKER_MODEL") {
            config.reranker.model = model;
        }
        if let Some(key) = lookup("RERANKER_API_KEY") {
            config.reranker.api_key = Some(key);
        }
        if let Some(v) = parse(&lookup, "RERANKER_TOP_N") {
            config.reranker.top_n = v;
        }
        if let Some(truncate) = lookup("RERANKER_TRUNCATE") {
            config.reranker.truncate = truncate.to_uppercase();
        }
        if let Some(v) = parse::<usize, _>(&lookup, "RERANKER_MAX_BATCH_SIZE") {
            config.reranker.max_batch_size = v.max(1);
        }
        if let Some(v) = parse::<u64, _>(&lookup, "RERANKER_TIMEOUT_SECS") {
            config.reranker.timeout_secs = v.min(60); // Cap at 60s
        }

        // Chat
        if let Some(url) = lookup("CHAT_BASE_URL") {
            config.chat.base_url = url;
        }
        if let Some(model) = lookup("CHAT_MODEL") {
            config.chat.model = model;
        }
        if let Some(key) = lookup("CHAT_API_KEY") {
            config.chat.api_key = Some(key);
        }
        if let Some(v) = parse(&lookup, "CHAT_TEMPERATURE") {
            config.chat.temperature = v;
        }
        if let Some(v) = parse(&lookup, "CHAT_MAX_TOKENS") {
            config.chat.max_tokens = v;
        }

        // Retrieval
        if let Some(v) = parse(&lookup, "RETRIEVAL_BM25_K") {
            config.retrieval.bm25_k = v;
        }
        if let Some(v) = parse(&lookup, "RETRIEVAL_VECTOR_K") {
            config.retrieval.vector_k = v;
        }
        if let Some(v) = parse(&lookup, "RETRIEVAL_CHUNK_SIZE") {
            config.retrieval.chunk_size = v;
        }
        if let Some(v) = parse(&lookup, "RETRIEVAL_CHUNK_OVERLAP") {
            config.retrieval.chunk_overlap = v;
        }

        config
    }

    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("index")
    }

    pub fn vector_dir(&self) -> PathBuf {
        self.data_dir.join("vectors")
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("sources.json")
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|v| v.trim().parse().ok())
}
