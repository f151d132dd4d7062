use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::models::DocumentChunk;

/// A stored vector entry
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VectorEntry {
    source_id: Uuid,
    source_name: String,
    doc_path: String,
    chunk_index: usize,
    content: String,
    kind: String,
    start_line: usize,
    end_line: usize,
    embedding: Vec<f32>,
}

/// In-memory vector store with disk persistence and cosine similarity search.
pub struct VectorStore {
    entries: RwLock<Vec<VectorEntry>>,
    persist_path: PathBuf,
    /// 0 = unlimited
    max_entries: usize,
}

#[derive(Debug, Clone)]
pub struct VectorHit {
    pub source_id: Uuid,
    pub source_name: String,
    pub doc_path: String,
    pub chunk_index: usize,
    pub content: String,
    pub kind: String,
    pub start_line: usize,
    pub end_line: usize,
    pub score: f32,
}

impl VectorStore {
    pub fn open_or_create(vector_dir: &Path) -> Result<Self> {
        Self::open_or_create_with_limit(vector_dir, 0)
    }

    pub fn open_or_create_with_limit(vector_dir: &Path, max_entries: usize) -> Result<Self> {
        std::fs::create_dir_all(vector_dir)?;
        let persist_path = vector_dir.join("vectors.json");

        let entries: Vec<VectorEntry> = if persist_path.exists() {
            let data =
                std::fs::read_to_string(&persist_path).context("Failed to read vector store")?;
            match serde_json::from_str(&data) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!("Vector store at {} is unreadable, starting empty: {e}", persist_path.display());
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        tracing::info!("Vector store loaded with {} entries", entries.len());

        Ok(Self {
            entries: RwLock::new(entries),
            persist_path,
            max_entries,
        })
    }

    /// Add vectors for document chunks. `embeddings` must be parallel with `chunks`.
    pub fn add_chunks(
        &self,
        source_id: Uuid,
        source_name: &str,
        chunks: &[DocumentChunk],
        embeddings: Vec<Vec<f32>>,
    ) -> Result<()> {
        if chunks.len() != embeddings.len() {
            anyhow::bail!(
                "Got {} embeddings for {} chunks",
                embeddings.len(),
                chunks.len()
            );
        }

        let mut entries = self.entries.write();

        let expected_dim = entries
            .first()
            .map(|e| e.embedding.len())
            .or_else(|| embeddings.first().map(|e| e.len()));
        if let Some(dim) = expected_dim {
            if let Some(bad) = embeddings.iter().find(|e| e.len() != dim) {
                anyhow::bail!(
                    "Embedding dimension mismatch: store uses {dim}, got {}",
                    bad.len()
                );
            }
        }

        if self.max_entries > 0 && entries.len() + chunks.len() > self.max_entries {
            anyhow::bail!(
                "Vector store limit reached ({} + {} > {})",
                entries.len(),
                chunks.len(),
                self.max_entries
            );
        }

        let old_len = entries.len();
        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            entries.push(VectorEntry {
                source_id,
                source_name: source_name.to_string(),
                doc_path: chunk.doc_path.clone(),
                chunk_index: chunk.chunk_index,
                content: chunk.content.clone(),
                kind: chunk.kind.clone(),
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                embedding,
            });
        }

        // Memory must not hold entries the disk does not
        if let Err(e) = self.persist(&entries) {
            entries.truncate(old_len);
            return Err(e);
        }
        Ok(())
    }

    /// Delete all vectors for a source.
    pub fn delete_source(&self, source_id: &Uuid) -> Result<()> {
        let mut entries = self.entries.write();
        let kept: Vec<VectorEntry> = entries
            .iter()
            .filter(|e| &e.source_id != source_id)
            .cloned()
            .collect();
        if kept.len() == entries.len() {
            return Ok(());
        }
        self.persist(&kept)?;
        *entries = kept;
        Ok(())
    }

    /// Search by cosine similarity against a query embedding.
    pub fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        source_ids: Option<&[Uuid]>,
    ) -> Result<Vec<VectorHit>> {
        let entries = self.entries.read();

        if let Some(dim) = entries.first().map(|e| e.embedding.len()) {
            if query_embedding.len() != dim {
                anyhow::bail!(
                    "Query embedding has dimension {}, store uses {dim} (was the embedding model changed?)",
                    query_embedding.len()
                );
            }
        }

        let mut scored: Vec<(f32, &VectorEntry)> = entries
            .iter()
            .filter(|e| {
                if let Some(ids) = source_ids {
                    ids.contains(&e.source_id)
                } else {
                    true
                }
            })
            .map(|e| (cosine_similarity(query_embedding, &e.embedding), e))
            .collect();

        // Sort descending by score
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(score, e)| VectorHit {
                source_id: e.source_id,
                source_name: e.source_name.clone(),
                doc_path: e.doc_path.clone(),
                chunk_index: e.chunk_index,
                content: e.content.clone(),
                kind: e.kind.clone(),
                start_line: e.start_line,
                end_line: e.end_line,
                score,
            })
            .collect())
    }

    pub fn entry_count(&self) -> usize {
        self.entries.read().len()
    }

    /// Dimension of the stored vectors, if any are stored.
    pub fn dimension(&self) -> Option<usize> {
        self.entries.read().first().map(|e| e.embedding.len())
    }

    /// Get counts grouped by source_id.
    pub fn source_counts(&self) -> HashMap<Uuid, usize> {
        let entries = self.entries.read();
        let mut counts = HashMap::new();
        for e in entries.iter() {
            *counts.entry(e.source_id).or_insert(0) += 1;
        }
        counts
    }

    /// Atomic write via temp file + rename.
    fn persist(&self, entries: &[VectorEntry]) -> Result<()> {
        let data = serde_json::to_string(entries)?;
        let tmp_path = self.persist_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, data).context("Failed to write vector store")?;
        std::fs::rename(&tmp_path, &self.persist_path).context("Failed to replace vector store")?;
        Ok(())
    }
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}
