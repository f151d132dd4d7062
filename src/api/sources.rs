use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use uuid::Uuid;

use crate::chunking::chunk_document;
use crate::ingest::{resolve_dir, text_document, walk_documents, LoadedDocument};
use crate::models::{AddSourceRequest, DocumentChunk, Source, SourceOrigin, SourceStatus};
use crate::state::AppState;

/// GET /api/sources - List all sources
pub async fn list_sources(State(state): State<AppState>) -> Json<Vec<Source>> {
    Json(state.sources.read().clone())
}

/// POST /api/sources - Add a directory or a pasted text (loaded and indexed in background)
pub async fn add_source(
    State(state): State<AppState>,
    Json(req): Json<AddSourceRequest>,
) -> Result<(StatusCode, Json<Source>), (StatusCode, String)> {
    let origin = match (req.path, req.text) {
        (Some(path), None) => {
            let dir = resolve_dir(&path).map_err(|e| (StatusCode::BAD_REQUEST, format!("{e:#}")))?;
            SourceOrigin::Directory { path: dir }
        }
        (None, Some(text)) => {
            if text.trim().is_empty() {
                return Err((StatusCode::BAD_REQUEST, "Text is empty".to_string()));
            }
            SourceOrigin::Text { content: text }
        }
        _ => {
            return Err((
                StatusCode::BAD_REQUEST,
                "Provide exactly one of `path` or `text`".to_string(),
            ))
        }
    };

    let source = {
        let mut sources = state.sources.write();
        if let SourceOrigin::Directory { path } = &origin {
            if sources.iter().any(|s| matches!(&s.origin, SourceOrigin::Directory { path: p } if p == path)) {
                return Err((
                    StatusCode::CONFLICT,
                    "This directory has already been added".to_string(),
                ));
            }
        }
        if sources.len() >= state.config.max_sources {
            return Err((
                StatusCode::BAD_REQUEST,
                format!(
                    "Maximum number of sources ({}) reached",
                    state.config.max_sources
                ),
            ));
        }

        let name = req
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| default_name(&origin, sources.len()));

        let source = Source {
            id: Uuid::new_v4(),
            name,
            origin,
            status: SourceStatus::Loading,
            added_at: Utc::now(),
            indexed_at: None,
            document_count: 0,
            chunk_count: 0,
        };
        sources.push(source.clone());
        source
    };
    state.persist_sources();

    spawn_ingest(state, source.id);
    Ok((StatusCode::CREATED, Json(source)))
}

/// DELETE /api/sources/{id} - Remove a source and its data in both stores
pub async fn delete_source(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    {
        let mut sources = state.sources.write();
        let pos = sources
            .iter()
            .position(|s| s.id == id)
            .ok_or((StatusCode::NOT_FOUND, "Source not found".to_string()))?;
        // A running ingest would write chunks back after the delete
        if !matches!(sources[pos].status, SourceStatus::Ready | SourceStatus::Error(_)) {
            return Err((
                StatusCode::CONFLICT,
                "Source is being processed; delete it once it is ready or failed".to_string(),
            ));
        }
        sources.remove(pos);
    }
    state.persist_sources();

    remove_indexed_data(&state, id).await;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/sources/{id}/reindex - Reload, re-chunk and re-embed a source
pub async fn reindex_source(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Source>, (StatusCode, String)> {
    let source = {
        let mut sources = state.sources.write();
        let source = sources
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or((StatusCode::NOT_FOUND, "Source not found".to_string()))?;
        if !matches!(source.status, SourceStatus::Ready | SourceStatus::Error(_)) {
            return Err((
                StatusCode::CONFLICT,
                "Source is already being processed".to_string(),
            ));
        }
        source.status = SourceStatus::Loading;
        source.clone()
    };
    state.persist_sources();

    spawn_ingest(state, id);
    Ok(Json(source))
}

fn spawn_ingest(state: AppState, source_id: Uuid) {
    tokio::spawn(async move {
        if let Err(e) = ingest_source(state, source_id).await {
            tracing::error!("Failed to ingest source {source_id}: {e:#}");
        }
    });
}

/// Load, chunk and index a source into both stores, replacing any previous data.
/// Moves the source through Loading, Indexing and Embedding to Ready. On failure
/// the source is left in `Error` with nothing in either store.
pub async fn ingest_source(state: AppState, source_id: Uuid) -> anyhow::Result<()> {
    let _permit = state
        .ingest_semaphore
        .acquire()
        .await
        .map_err(|_| anyhow::anyhow!("Ingest semaphore closed"))?;

    let result = load_and_index(&state, source_id).await;
    if let Err(e) = &result {
        remove_indexed_data(&state, source_id).await;
        update_source_status(&state, source_id, SourceStatus::Error(format!("{e:#}")));
    }
    result
}

async fn load_and_index(state: &AppState, source_id: Uuid) -> anyhow::Result<()> {
    let (name, origin) = {
        let sources = state.sources.read();
        let source = sources
            .iter()
            .find(|s| s.id == source_id)
            .ok_or_else(|| anyhow::anyhow!("Source not found"))?;
        (source.name.clone(), source.origin.clone())
    };

    // Loading
    update_source_status(state, source_id, SourceStatus::Loading);
    let docs = load_documents(&name, origin).await?;
    if docs.is_empty() {
        anyhow::bail!("No readable documents found in {name}");
    }

    // Indexing
    update_source_status(state, source_id, SourceStatus::Indexing);
    let retrieval = &state.config.retrieval;
    let chunks: Vec<DocumentChunk> = docs
        .iter()
        .flat_map(|d| {
            chunk_document(
                source_id,
                &d.relative_path,
                &d.content,
                &d.kind,
                retrieval.chunk_size,
                retrieval.chunk_overlap,
            )
        })
        .collect();
    tracing::info!(
        "Created {} chunks from {} documents in {name}",
        chunks.len(),
        docs.len()
    );

    remove_indexed_data(state, source_id).await;

    let bm25 = state.bm25.clone();
    let bm25_chunks = chunks.clone();
    let bm25_name = name.clone();
    tokio::task::spawn_blocking(move || bm25.index_chunks(&bm25_name, &bm25_chunks)).await??;
    tracing::info!("BM25 indexing complete for {name}");

    // Embedding
    update_source_status(state, source_id, SourceStatus::Embedding);
    let texts: Vec<String> = chunks.iter().map(passage_text).collect();
    let embeddings = state
        .embedder
        .embed_documents(&texts)
        .await
        .map_err(|e| anyhow::anyhow!("Embedding failed: {e:#}"))?;
    state
        .vectors
        .add_chunks(source_id, &name, &chunks, embeddings)?;
    tracing::info!("Vector indexing complete for {name}");

    {
        let mut sources = state.sources.write();
        if let Some(source) = sources.iter_mut().find(|s| s.id == source_id) {
            source.status = SourceStatus::Ready;
            source.indexed_at = Some(Utc::now());
            source.document_count = docs.len();
            source.chunk_count = chunks.len();
        }
    }
    state.persist_sources();

    tracing::info!("Source {name} is ready for search");
    Ok(())
}

async fn load_documents(name: &str, origin: SourceOrigin) -> anyhow::Result<Vec<LoadedDocument>> {
    match origin {
        SourceOrigin::Directory { path } => {
            tokio::task::spawn_blocking(move || walk_documents(&path)).await?
        }
        SourceOrigin::Text { content } => Ok(vec![text_document(name, &content)?]),
    }
}

/// Text sent to the embedding service for a chunk. The path gives the
/// passage some context the chunk alone may lack.
fn passage_text(chunk: &DocumentChunk) -> String {
    format!("Document: {}\n{}", chunk.doc_path, chunk.content)
}

/// Drop a source's chunks from both stores. Failures are logged, not fatal.
async fn remove_indexed_data(state: &AppState, source_id: Uuid) {
    let bm25 = state.bm25.clone();
    match tokio::task::spawn_blocking(move || bm25.delete_source(&source_id)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("Failed to delete BM25 data for {source_id}: {e}"),
        Err(e) => tracing::warn!("BM25 delete task failed for {source_id}: {e}"),
    }
    if let Err(e) = state.vectors.delete_source(&source_id) {
        tracing::warn!("Failed to delete vector data for {source_id}: {e}");
    }
}

fn update_source_status(state: &AppState, source_id: Uuid, status: SourceStatus) {
    {
        let mut sources = state.sources.write();
        if let Some(source) = sources.iter_mut().find(|s| s.id == source_id) {
            source.status = status;
        }
    }
    state.persist_sources();
}

fn default_name(origin: &SourceOrigin, existing: usize) -> String {
    match origin {
        SourceOrigin::Directory { path } => path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "documents".to_string()),
        SourceOrigin::Text { .. } => format!("text-{}", existing + 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::llm::embeddings::Embedder;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Arc;

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed_query(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            anyhow::bail!("embedding service returned 503")
        }

        async fn embed_documents(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            anyhow::bail!("embedding service returned 503")
        }
    }

    fn state_with_text_source(dir: &tempfile::TempDir, status: SourceStatus) -> (AppState, Uuid) {
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let state =
            AppState::with_services(config, reqwest::Client::new(), Arc::new(FailingEmbedder), None)
                .unwrap();
        let id = Uuid::new_v4();
        state.sources.write().push(Source {
            id,
            name: "notes".to_string(),
            origin: SourceOrigin::Text {
                content: "Reranking keeps the best passages for the answer.".to_string(),
            },
            status,
            added_at: Utc::now(),
            indexed_at: None,
            document_count: 0,
            chunk_count: 0,
        });
        (state, id)
    }

    fn chunk(path: &str, content: &str) -> DocumentChunk {
        DocumentChunk {
            source_id: Uuid::nil(),
            doc_path: path.to_string(),
            chunk_index: 0,
            content: content.to_string(),
            kind: "markdown".to_string(),
            start_line: 1,
            end_line: 1,
        }
    }

    #[test]
    fn test_default_name_from_directory() {
        let origin = SourceOrigin::Directory {
            path: PathBuf::from("/data/nim-docs"),
        };
        assert_eq!(default_name(&origin, 0), "nim-docs");
    }

    #[test]
    fn test_default_name_for_text_is_numbered() {
        let origin = SourceOrigin::Text {
            content: "x".to_string(),
        };
        assert_eq!(default_name(&origin, 2), "text-3");
    }

    #[test]
    fn test_passage_text_prefixes_path() {
        let text = passage_text(&chunk("guide/install.md", "pip install"));
        assert_eq!(text, "Document: guide/install.md\npip install");
    }

    #[tokio::test]
    async fn test_load_text_source() {
        let docs = load_documents(
            "notes",
            SourceOrigin::Text {
                content: "Reranking keeps the best passages.".to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].relative_path, "notes");
    }

    #[tokio::test]
    async fn test_load_missing_directory_fails() {
        let result = load_documents(
            "missing",
            SourceOrigin::Directory {
                path: PathBuf::from("/definitely/not/here"),
            },
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_failed_embedding_leaves_no_indexed_data() {
        let dir = tempfile::tempdir().unwrap();
        let (state, id) = state_with_text_source(&dir, SourceStatus::Loading);

        let result = ingest_source(state.clone(), id).await;
        assert!(result.is_err());

        let status = state.sources.read()[0].status.clone();
        match status {
            SourceStatus::Error(msg) => assert!(msg.contains("Embedding failed"), "{msg}"),
            other => panic!("expected Error status, got {other:?}"),
        }
        assert_eq!(state.bm25.doc_count(), 0);
        assert_eq!(state.vectors.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_rejected_while_ingesting() {
        let dir = tempfile::tempdir().unwrap();
        let (state, id) = state_with_text_source(&dir, SourceStatus::Embedding);

        let err = delete_source(State(state.clone()), Path(id)).await.unwrap_err();
        assert_eq!(err.0, StatusCode::CONFLICT);
        assert_eq!(state.sources.read().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_ready_and_failed_sources() {
        let dir = tempfile::tempdir().unwrap();
        let (state, id) = state_with_text_source(&dir, SourceStatus::Ready);
        let status = delete_source(State(state.clone()), Path(id)).await.unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(state.sources.read().is_empty());

        let dir = tempfile::tempdir().unwrap();
        let (state, id) = state_with_text_source(&dir, SourceStatus::Error("boom".to_string()));
        assert!(delete_source(State(state.clone()), Path(id)).await.is_ok());

        let missing = delete_source(State(state), Path(id)).await.unwrap_err();
        assert_eq!(missing.0, StatusCode::NOT_FOUND);
    }
}
