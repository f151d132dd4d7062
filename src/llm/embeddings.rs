use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingConfig;

/// Which side of an asymmetric retrieval model a text is embedded for.
/// NeMo Retriever embedding models use different prefixes for queries and passages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Query,
    Passage,
}

/// Text to vector conversion used by the vector store.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a search query.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed document passages, in input order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embedding client for the NVIDIA API catalog / NeMo Retriever embedding NIM,
/// or a local Ollama server.
pub struct HttpEmbedder {
    client: reqwest::Client,
    config: EmbeddingConfig,
}

impl HttpEmbedder {
    pub fn new(client: reqwest::Client, config: EmbeddingConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    async fn embed(&self, texts: &[String], input_type: InputType) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let truncated: Vec<String> = texts
            .iter()
            .map(|t| truncate_chars(t, self.config.max_chars).to_string())
            .collect();

        let embeddings = match self.config.provider.as_str() {
            "nvidia" | "openai" => {
                embed_nvidia(&self.client, &self.config, &truncated, input_type).await?
            }
            "ollama" => embed_ollama(&self.client, &self.config, &truncated).await?,
            other => anyhow::bail!("Unknown embedding provider: {other}"),
        };

        if embeddings.len() != texts.len() {
            anyhow::bail!(
                "Embedding service returned {} vectors for {} inputs",
                embeddings.len(),
                texts.len()
            );
        }

        Ok(embeddings)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed(&[text.to_string()], InputType::Query).await?;
        results.into_iter().next().context("No embedding returned")
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed(texts, InputType::Passage).await
    }
}

/// Truncate `text` to at most `max_chars` bytes, splitting on a UTF-8 char boundary.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    if max_chars == 0 || text.len() <= max_chars {
        return text;
    }
    let mut end = max_chars;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn bearer(api_key: Option<&str>) -> Option<String> {
    api_key
        .filter(|k| !k.is_empty())
        .map(|k| format!("Bearer {k}"))
}

// ─── NVIDIA (OpenAI-compatible + NeMo fields) ────────────

#[derive(Serialize)]
struct NvidiaEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    input_type: InputType,
    encoding_format: &'static str,
    truncate: &'a str,
}

#[derive(Deserialize)]
struct NvidiaEmbedResponse {
    data: Vec<NvidiaEmbedData>,
}

#[derive(Deserialize)]
struct NvidiaEmbedData {
    embedding: Vec<f32>,
    index: Option<usize>,
}

async fn embed_nvidia(
    client: &reqwest::Client,
    config: &EmbeddingConfig,
    texts: &[String],
    input_type: InputType,
) -> Result<Vec<Vec<f32>>> {
    let url = format!("{}/embeddings", config.base_url.trim_end_matches('/'));
    let batch_size = config.batch_size.max(1);
    let mut all_embeddings = Vec::with_capacity(texts.len());

    for chunk in texts.chunks(batch_size) {
        let req = NvidiaEmbedRequest {
            model: &config.model,
            input: chunk,
            input_type,
            encoding_format: "float",
            truncate: &config.truncate,
        };

        let mut request = client.post(&url).json(&req);
        if let Some(auth) = bearer(config.api_key.as_deref()) {
            request = request.header("Authorization", auth);
        }

        let resp = request
            .send()
            .await
            .context("Failed to call NVIDIA embedding API")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("NVIDIA embedding API returned {status}: {body}");
        }

        let body: NvidiaEmbedResponse = resp
            .json()
            .await
            .context("Failed to parse NVIDIA embedding response")?;

        all_embeddings.extend(order_by_index(body.data, chunk.len())?);
    }

    tracing::debug!(
        "Embedded {} texts as {:?} with {}",
        texts.len(),
        input_type,
        config.model
    );
    Ok(all_embeddings)
}

/// Place embeddings by their `index` field when the service provides one.
fn order_by_index(data: Vec<NvidiaEmbedData>, expected: usize) -> Result<Vec<Vec<f32>>> {
    if data.iter().any(|d| d.index.is_none()) {
        return Ok(data.into_iter().map(|d| d.embedding).collect());
    }

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for d in data {
        let i = d.index.unwrap_or_default();
        match slots.get_mut(i) {
            Some(slot) if slot.is_none() => *slot = Some(d.embedding),
            _ => anyhow::bail!("Embedding response has invalid or duplicate index {i}"),
        }
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.with_context(|| format!("Embedding response is missing index {i}")))
        .collect()
}

// ─── Ollama ──────────────────────────────────────────────

#[derive(Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    /// Ask Ollama to truncate inputs that exceed the model's context length
    /// instead of returning a 400 error.
    truncate: bool,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

async fn embed_ollama(
    client: &reqwest::Client,
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let url = format!("{}/api/embed", config.base_url.trim_end_matches('/'));
    let mut all_embeddings = Vec::with_capacity(texts.len());

    for chunk in texts.chunks(config.batch_size.max(1)) {
        let req = OllamaEmbedRequest {
            model: &config.model,
            input: chunk,
            truncate: true,
        };

        let resp = client
            .post(&url)
            .json(&req)
            .send()
            .await
            .context("Failed to call Ollama embed API")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Ollama embed API returned {status}: {body}");
        }

        let body: OllamaEmbedResponse = resp
            .json()
            .await
            .context("Failed to parse Ollama embed response")?;

        all_embeddings.extend(body.embeddings);
    }

    Ok(all_embeddings)
}
