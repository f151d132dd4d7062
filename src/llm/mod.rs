//! Clients for the hosted model services: embeddings, reranking and chat.

pub mod chat;
pub mod embeddings;
pub mod rerank;
