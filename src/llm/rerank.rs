//! NeMo Retriever reranking client.
//!
//! Sends the query and candidate passages to the ranking endpoint (hosted at
//! `ai.api.nvidia.com` or a self-hosted NIM) and keeps the `top_n` most relevant.
//! Large candidate lists are split into batches of `max_batch_size` passages that
//! are ranked concurrently and merged by logit.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::config::RerankerConfig;
use crate::models::{Candidate, RankedDocument};

/// Result of reranking a single document.
#[derive(Debug, Clone, PartialEq)]
pub struct RerankResult {
    /// Index into the original documents array.
    pub index: usize,
    /// Raw relevance logit returned by the service.
    pub logit: f32,
    /// Relevance normalized to 0-1 (sigmoid of the logit).
    pub score: f32,
}

/// Reorders documents by relevance to a query.
#[async_trait]
pub trait Reranker: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Return at most `top_n` results, best first. Every `index` refers to an
    /// element of `documents` and appears at most once.
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankResult>>;
}

/// Rerank retrieved candidates and attach relevance scores to the survivors.
pub async fn compress(
    reranker: &dyn Reranker,
    query: &str,
    candidates: &[Candidate],
    top_n: usize,
) -> Result<Vec<RankedDocument>> {
    if candidates.is_empty() || top_n == 0 {
        return Ok(Vec::new());
    }

    let documents: Vec<String> = candidates.iter().map(|c| c.content.clone()).collect();
    let results = reranker.rerank(query, &documents, top_n).await?;

    Ok(results
        .into_iter()
        .filter_map(|r| candidates.get(r.index).map(|c| (r, c)))
        .take(top_n)
        .enumerate()
        .map(|(i, (r, c))| RankedDocument {
            rank: i + 1,
            relevance_score: r.logit,
            score: r.score,
            candidate: c.clone(),
        })
        .collect())
}

/// Sigmoid normalization: maps raw logits to 0-1 range.
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Resolve the ranking URL. Full ranking URLs are used as-is; anything else is
/// treated as a NIM base URL.
pub fn ranking_endpoint(base_url: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    if trimmed.ends_with("/ranking") || trimmed.ends_with("/reranking") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/ranking")
    }
}

fn is_hosted(url: &str) -> bool {
    url.contains("api.nvidia.com")
}

/// Client for the NVIDIA ranking API.
pub struct NimReranker {
    client: reqwest::Client,
    config: RerankerConfig,
    endpoint: String,
}

impl NimReranker {
    pub fn new(client: reqwest::Client, config: RerankerConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .context("Reranker base_url not configured")?;
        let endpoint = ranking_endpoint(base_url);

        let has_key = config.api_key.as_deref().is_some_and(|k| !k.is_empty());
        if is_hosted(&endpoint) && !has_key {
            anyhow::bail!(
                "Hosted reranker at {endpoint} requires an API key (set NVIDIA_API_KEY or RERANKER_API_KEY)"
            );
        }

        Ok(Self {
            client,
            config,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Rank one batch; returned indices are relative to `passages`.
    async fn rank_batch(&self, query: &str, passages: &[String]) -> Result<Vec<RawRanking>> {
        let req_body = RankingRequest {
            model: &self.config.model,
            query: TextItem { text: query },
            passages: passages.iter().map(|p| TextItem { text: p }).collect(),
            truncate: &self.config.truncate,
        };

        let timeout = std::time::Duration::from_secs(self.config.timeout_secs.min(60));

        let mut request = self
            .client
            .post(&self.endpoint)
            .timeout(timeout)
            .header("Accept", "application/json")
            .json(&req_body);
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let resp = request
            .send()
            .await
            .context("Failed to reach reranker endpoint")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Reranker returned {status}: {body}");
        }

        let body: RankingResponse = resp
            .json()
            .await
            .context("Failed to parse reranker response")?;

        Ok(body.rankings)
    }
}

#[async_trait]
impl Reranker for NimReranker {
    fn name(&self) -> &str {
        if is_hosted(&self.endpoint) {
            "nvidia"
        } else {
            "nim"
        }
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankResult>> {
        if documents.is_empty() || top_n == 0 {
            return Ok(Vec::new());
        }

        let batch_size = self.config.max_batch_size.max(1);
        let batches: Vec<(usize, &[String])> = documents
            .chunks(batch_size)
            .enumerate()
            .map(|(i, chunk)| (i * batch_size, chunk))
            .collect();

        tracing::debug!(
            "Reranking {} passages in {} batch(es) with {}",
            documents.len(),
            batches.len(),
            self.config.model
        );

        let responses = try_join_all(batches.iter().map(|(offset, chunk)| async move {
            let rankings = self.rank_batch(query, chunk).await?;
            Ok::<_, anyhow::Error>((*offset, chunk.len(), rankings))
        }))
        .await?;

        let mut seen = HashSet::new();
        let mut results = Vec::with_capacity(documents.len());
        for (offset, len, rankings) in responses {
            for r in rankings {
                if r.index >= len {
                    tracing::warn!("Reranker returned out-of-range index {} (batch of {len})", r.index);
                    continue;
                }
                let index = offset + r.index;
                if !seen.insert(index) {
                    tracing::warn!("Reranker returned duplicate index {index}");
                    continue;
                }
                results.push(RerankResult {
                    index,
                    logit: r.logit,
                    score: sigmoid(r.logit),
                });
            }
        }

        // Best first; ties keep input order
        results.sort_by(|a, b| {
            b.logit
                .partial_cmp(&a.logit)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.index.cmp(&b.index))
        });
        results.truncate(top_n);

        Ok(results)
    }
}

// ─── Request/Response types ────────────────────────────

#[derive(Serialize)]
struct TextItem<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct RankingRequest<'a> {
    model: &'a str,
    query: TextItem<'a>,
    passages: Vec<TextItem<'a>>,
    truncate: &'a str,
}

#[derive(Deserialize)]
struct RankingResponse {
    rankings: Vec<RawRanking>,
}

#[derive(Deserialize)]
struct RawRanking {
    index: usize,
    logit: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Retriever;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use uuid::Uuid;

    #[derive(Clone, Default)]
    struct Fake {
        requests: Arc<Mutex<Vec<(Option<String>, serde_json::Value)>>>,
        /// Extra bogus rankings appended to each response
        bogus: bool,
    }

    /// Scores each passage by how many query words it contains.
    async fn fake_ranking(
        State(fake): State<Fake>,
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        fake.requests.lock().push((auth, body.clone()));

        let query = body["query"]["text"].as_str().unwrap_or_default().to_lowercase();
        if query == "explode" {
            return Err((StatusCode::INTERNAL_SERVER_ERROR, "model crashed".to_string()));
        }
        let words: Vec<&str> = query.split_whitespace().collect();
        let passages = body["passages"].as_array().cloned().unwrap_or_default();
        let mut rankings: Vec<serde_json::Value> = passages
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let text = p["text"].as_str().unwrap_or_default().to_lowercase();
                let hits = words.iter().filter(|w| text.contains(*w)).count();
                serde_json::json!({"index": i, "logit": hits as f32 - 1.0})
            })
            .collect();
        if fake.bogus {
            rankings.push(serde_json::json!({"index": 999, "logit": 50.0}));
            rankings.push(serde_json::json!({"index": 0, "logit": 40.0}));
        }
        Ok(Json(serde_json::json!({ "rankings": rankings })))
    }

    async fn spawn_fake(fake: Fake) -> String {
        let app = Router::new()
            .route("/v1/ranking", post(fake_ranking))
            .with_state(fake);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/v1")
    }

    fn config(base_url: String, batch: usize) -> RerankerConfig {
        RerankerConfig {
            base_url: Some(base_url),
            api_key: None,
            max_batch_size: batch,
            ..RerankerConfig::default()
        }
    }

    fn docs(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_sigmoid_zero() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_sigmoid_symmetry() {
        let x = 2.5f32;
        assert!((sigmoid(x) + sigmoid(-x) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_sigmoid_known_value() {
        assert!((sigmoid(1.0) - 0.7310586).abs() < 1e-5);
    }

    #[test]
    fn test_ranking_endpoint_resolution() {
        assert_eq!(
            ranking_endpoint("https://ai.api.nvidia.com/v1/retrieval/nvidia/reranking"),
            "https://ai.api.nvidia.com/v1/retrieval/nvidia/reranking"
        );
        assert_eq!(
            ranking_endpoint("http://localhost:8000/v1/"),
            "http://localhost:8000/v1/ranking"
        );
        assert_eq!(
            ranking_endpoint("http://nim:8000/v1/ranking"),
            "http://nim:8000/v1/ranking"
        );
    }

    #[test]
    fn test_hosted_requires_api_key() {
        let cfg = RerankerConfig::default();
        assert!(NimReranker::new(reqwest::Client::new(), cfg.clone()).is_err());

        let with_key = RerankerConfig {
            api_key: Some("nvapi-x".to_string()),
            ..cfg
        };
        let reranker = NimReranker::new(reqwest::Client::new(), with_key).unwrap();
        assert_eq!(reranker.name(), "nvidia");
    }

    #[test]
    fn test_missing_base_url_errors() {
        let cfg = RerankerConfig {
            base_url: None,
            ..RerankerConfig::default()
        };
        assert!(NimReranker::new(reqwest::Client::new(), cfg).is_err());
    }

    #[tokio::test]
    async fn test_rerank_orders_and_truncates() {
        let fake = Fake::default();
        let url = spawn_fake(fake.clone()).await;
        let reranker = NimReranker::new(reqwest::Client::new(), config(url, 32)).unwrap();
        assert_eq!(reranker.name(), "nim");

        let documents = docs(&[
            "cooking pasta at home",
            "GPU memory for triton inference",
            "triton inference server",
            "memory of a goldfish",
        ]);
        let results = reranker
            .rerank("triton inference gpu memory", &documents, 2)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].index, 1);
        assert_eq!(results[1].index, 2);
        assert!(results[0].logit > results[1].logit);
        assert!((results[0].score - sigmoid(results[0].logit)).abs() < 1e-6);

        let requests = fake.requests.lock();
        assert_eq!(requests.len(), 1);
        let body = &requests[0].1;
        assert_eq!(body["query"]["text"], "triton inference gpu memory");
        assert_eq!(body["passages"].as_array().unwrap().len(), 4);
        assert_eq!(body["truncate"], "END");
        assert!(requests[0].0.is_none());
    }

    #[tokio::test]
    async fn test_batches_rebase_indices() {
        let fake = Fake::default();
        let url = spawn_fake(fake.clone()).await;
        let reranker = NimReranker::new(reqwest::Client::new(), config(url, 2)).unwrap();

        let documents = docs(&["a", "b", "c", "d", "nemo retriever", "f"]);
        let results = reranker.rerank("nemo retriever", &documents, 10).await.unwrap();

        assert_eq!(fake.requests.lock().len(), 3);
        assert_eq!(results.len(), 6);
        assert_eq!(results[0].index, 4);
        // ties (all logit -1.0) keep input order
        let rest: Vec<usize> = results[1..].iter().map(|r| r.index).collect();
        assert_eq!(rest, vec![0, 1, 2, 3, 5]);
    }

    #[tokio::test]
    async fn test_bogus_indices_dropped() {
        let fake = Fake {
            bogus: true,
            ..Fake::default()
        };
        let url = spawn_fake(fake).await;
        let reranker = NimReranker::new(reqwest::Client::new(), config(url, 32)).unwrap();

        let documents = docs(&["alpha", "beta"]);
        let results = reranker.rerank("alpha", &documents, 5).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.index < documents.len()));
        // the duplicate index-0 entry (logit 40) was dropped; the first one kept
        assert_eq!(results[0].index, 0);
        assert_eq!(results[0].logit, 0.0);
    }

    #[tokio::test]
    async fn test_api_key_sent_as_bearer() {
        let fake = Fake::default();
        let url = spawn_fake(fake.clone()).await;
        let mut cfg = config(url, 32);
        cfg.api_key = Some("nim-secret".to_string());
        let reranker = NimReranker::new(reqwest::Client::new(), cfg).unwrap();
        reranker.rerank("q", &docs(&["x"]), 1).await.unwrap();
        assert_eq!(
            fake.requests.lock()[0].0.as_deref(),
            Some("Bearer nim-secret")
        );
    }

    #[tokio::test]
    async fn test_server_error_surfaces() {
        let url = spawn_fake(Fake::default()).await;
        let reranker = NimReranker::new(reqwest::Client::new(), config(url, 32)).unwrap();
        let err = reranker
            .rerank("explode", &docs(&["x"]), 1)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_empty_or_zero_top_n_skips_request() {
        let fake = Fake::default();
        let url = spawn_fake(fake.clone()).await;
        let reranker = NimReranker::new(reqwest::Client::new(), config(url, 32)).unwrap();
        assert!(reranker.rerank("q", &[], 5).await.unwrap().is_empty());
        assert!(reranker.rerank("q", &docs(&["x"]), 0).await.unwrap().is_empty());
        assert!(fake.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_compress_maps_back_to_candidates() {
        let url = spawn_fake(Fake::default()).await;
        let reranker = NimReranker::new(reqwest::Client::new(), config(url, 32)).unwrap();

        let candidates: Vec<Candidate> = ["unrelated text", "tensorrt engine build"]
            .iter()
            .enumerate()
            .map(|(i, text)| Candidate {
                source_id: Uuid::nil(),
                source_name: "docs".to_string(),
                doc_path: format!("doc{i}.md"),
                chunk_index: 0,
                content: text.to_string(),
                kind: "markdown".to_string(),
                start_line: 1,
                end_line: 1,
                retriever: Retriever::Bm25,
                store_score: 1.0,
                also_from: vec![],
            })
            .collect();

        let ranked = compress(&reranker, "tensorrt engine", &candidates, 1)
            .await
            .unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[0].candidate.doc_path, "doc1.md");
        assert_eq!(ranked[0].relevance_score, 1.0);
    }
}
