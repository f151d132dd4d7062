//! # nemo-rag
//!
//! Retrieval service that searches a lexical (BM25) store and a semantic
//! (vector) store, concatenates both result lists and lets the NVIDIA NeMo
//! Retriever reranking model keep only the most relevant passages.
//!
//! ## Architecture
//!
//! ```text
//!                        ┌──────────────┐
//!                        │  User Query  │
//!                        └──────┬───────┘
//!                               │
//!                  ┌────────────┴────────────┐
//!                  ▼                         ▼
//!         ┌────────────────┐       ┌──────────────────┐
//!         │  BM25 (tantivy)│       │ embed_query (NIM)│
//!         │   top bm25_k   │       └────────┬─────────┘
//!         └───────┬────────┘                ▼
//!                 │                ┌──────────────────┐
//!                 │                │  Vector store    │
//!                 │                │  top vector_k    │
//!                 │                └────────┬─────────┘
//!                 └────────────┬────────────┘
//!                              ▼
//!                  ┌───────────────────────┐
//!                  │  Concatenate          │
//!                  │  BM25 first, then vec │
//!                  │  (optional dedup)     │
//!                  └───────────┬───────────┘
//!                              ▼
//!                  ┌───────────────────────┐
//!                  │  NeMo reranker        │
//!                  │  logits, keep top_n   │
//!                  │  (RRF if unavailable) │
//!                  └───────────┬───────────┘
//!                              ▼
//!                  ┌───────────────────────┐
//!                  │  Ranked passages      │
//!                  │  (optional LLM answer)│
//!                  └───────────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration for the stores and NVIDIA services
//! - [`models`] - Shared data types: `Source`, `DocumentChunk`, `Candidate`, `RankedDocument`
//! - [`ingest`] - Directory walking and pasted-text loading
//! - [`chunking`] - Recursive character splitter with line tracking
//! - [`search::bm25`] - BM25 full-text store powered by tantivy
//! - [`search::vector`] - In-memory vector store with cosine similarity and disk persistence
//! - [`search::combine`] - Concatenation, dedup and Reciprocal Rank Fusion
//! - [`llm::embeddings`] - Query/passage embeddings via NeMo Retriever or Ollama
//! - [`llm::rerank`] - NeMo Retriever ranking client and `top_n` compression
//! - [`llm::chat`] - Answer generation over reranked passages
//! - [`pipeline`] - The retrieve, concatenate, rerank flow
//! - [`api`] - Axum HTTP handlers for sources, search, ask and config
//! - [`state`] - Shared application state holding stores, services and persistence

pub mod api;
pub mod chunking;
pub mod config;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod search;
pub mod state;
