use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::path::Path;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::*;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, Term};
use uuid::Uuid;

use crate::models::DocumentChunk;

/// Heap budget for a single index writer.
const WRITER_HEAP_BYTES: usize = 50_000_000;

/// BM25 document store built on tantivy.
pub struct Bm25Index {
    index: Index,
    reader: IndexReader,
    // tantivy allows one writer per index at a time
    write_lock: Mutex<()>,
    // Field handles
    f_source_id: Field,
    f_source_name: Field,
    f_doc_path: Field,
    f_chunk_index: Field,
    f_content: Field,
    f_kind: Field,
    f_start_line: Field,
    f_end_line: Field,
}

#[derive(Debug, Clone)]
pub struct Bm25Hit {
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

impl Bm25Index {
    /// Create or open a BM25 index at the given directory.
    pub fn open_or_create(index_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(index_dir)?;

        let mut schema_builder = Schema::builder();
        let f_source_id = schema_builder.add_text_field("source_id", STRING | STORED);
        let f_source_name = schema_builder.add_text_field("source_name", STRING | STORED);
        let f_doc_path = schema_builder.add_text_field("doc_path", TEXT | STORED);
        let f_chunk_index =
            schema_builder.add_u64_field("chunk_index", NumericOptions::default() | STORED);
        let f_content = schema_builder.add_text_field("content", TEXT | STORED);
        let f_kind = schema_builder.add_text_field("kind", STRING | STORED);
        let f_start_line =
            schema_builder.add_u64_field("start_line", NumericOptions::default() | STORED);
        let f_end_line =
            schema_builder.add_u64_field("end_line", NumericOptions::default() | STORED);

        let schema = schema_builder.build();

        let index = if index_dir.join("meta.json").exists() {
            Index::open_in_dir(index_dir).context("Failed to open existing tantivy index")?
        } else {
            Index::create_in_dir(index_dir, schema).context("Failed to create tantivy index")?
        };

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .context("Failed to create reader")?;

        Ok(Self {
            index,
            reader,
            write_lock: Mutex::new(()),
            f_source_id,
            f_source_name,
            f_doc_path,
            f_chunk_index,
            f_content,
            f_kind,
            f_start_line,
            f_end_line,
        })
    }

    /// Index a batch of document chunks for a source.
    pub fn index_chunks(&self, source_name: &str, chunks: &[DocumentChunk]) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut writer: IndexWriter = self
            .index
            .writer(WRITER_HEAP_BYTES)
            .context("Failed to create index writer")?;

        for chunk in chunks {
            writer.add_document(doc!(
                self.f_source_id => chunk.source_id.to_string(),
                self.f_source_name => source_name.to_string(),
                self.f_doc_path => chunk.doc_path.clone(),
                self.f_chunk_index => chunk.chunk_index as u64,
                self.f_content => chunk.content.clone(),
                self.f_kind => chunk.kind.clone(),
                self.f_start_line => chunk.start_line as u64,
                self.f_end_line => chunk.end_line as u64,
            ))?;
        }

        writer.commit().context("Failed to commit index")?;
        self.reader.reload().context("Failed to reload reader")?;
        tracing::debug!("Indexed {} chunks for {source_name}", chunks.len());
        Ok(())
    }

    /// Delete all documents for a given source.
    pub fn delete_source(&self, source_id: &Uuid) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut writer: IndexWriter = self
            .index
            .writer(WRITER_HEAP_BYTES)
            .context("Failed to create index writer")?;

        let term = Term::from_field_text(self.f_source_id, &source_id.to_string());
        writer.delete_term(term);
        writer.commit().context("Failed to commit delete")?;
        self.reader.reload().context("Failed to reload reader")?;
        Ok(())
    }

    /// Number of live documents in the index.
    pub fn doc_count(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// Search the index and return up to `limit` hits by BM25 score.
    pub fn search(
        &self,
        query_str: &str,
        limit: usize,
        source_ids: Option<&[Uuid]>,
    ) -> Result<Vec<Bm25Hit>> {
        if limit == 0 || query_str.trim().is_empty() {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();

        let query_parser =
            QueryParser::for_index(&self.index, vec![self.f_content, self.f_doc_path]);
        let query = match query_parser.parse_query(query_str) {
            Ok(q) => q,
            Err(e) => {
                // Natural-language questions often contain characters the strict
                // grammar rejects (e.g. a trailing '?' or unbalanced quotes).
                tracing::debug!("Strict query parse failed ({e}), retrying leniently");
                let (q, _errors) = query_parser.parse_query_lenient(query_str);
                q
            }
        };

        // Restrict to the requested sources inside the query so the top `limit`
        // are counted among matching sources only
        let query: Box<dyn Query> = match source_ids {
            Some([]) => return Ok(Vec::new()),
            Some(ids) => {
                let sources: Vec<(Occur, Box<dyn Query>)> = ids
                    .iter()
                    .map(|id| {
                        let term = Term::from_field_text(self.f_source_id, &id.to_string());
                        let q: Box<dyn Query> =
                            Box::new(TermQuery::new(term, IndexRecordOption::Basic));
                        (Occur::Should, q)
                    })
                    .collect();
                Box::new(BooleanQuery::new(vec![
                    (Occur::Must, query),
                    (Occur::Must, Box::new(BooleanQuery::new(sources))),
                ]))
            }
            None => query,
        };

        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(limit))
            .context("Search failed")?;

        let mut hits = Vec::new();

        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(doc_address)
                .context("Failed to retrieve document")?;

            let source_id_str = doc
                .get_first(self.f_source_id)
                .and_then(|v| v.as_str())
                .unwrap_or_default();

            let source_id = match Uuid::parse_str(source_id_str) {
                Ok(id) => id,
                Err(_) => continue,
            };

            hits.push(Bm25Hit {
                source_id,
                source_name: self.text(&doc, self.f_source_name),
                doc_path: self.text(&doc, self.f_doc_path),
                chunk_index: self.number(&doc, self.f_chunk_index),
                content: self.text(&doc, self.f_content),
                kind: self.text(&doc, self.f_kind),
                start_line: self.number(&doc, self.f_start_line),
                end_line: self.number(&doc, self.f_end_line),
                score,
            });

            if hits.len() >= limit {
                break;
            }
        }

        Ok(hits)
    }

    fn text(&self, doc: &TantivyDocument, field: Field) -> String {
        doc.get_first(field)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }

    fn number(&self, doc: &TantivyDocument, field: Field) -> usize {
        doc.get_first(field).and_then(|v| v.as_u64()).unwrap_or(0) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(source_id: Uuid, path: &str, content: &str) -> DocumentChunk {
        DocumentChunk {
            source_id,
            doc_path: path.to_string(),
            chunk_index: 0,
            content: content.to_string(),
            kind: "text".to_string(),
            start_line: 1,
            end_line: 1,
        }
    }

    #[test]
    fn test_zero_limit_returns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let index = Bm25Index::open_or_create(dir.path()).unwrap();
        let id = Uuid::new_v4();
        index
            .index_chunks("docs", &[chunk(id, "a.txt", "tensor cores")])
            .unwrap();
        assert!(index.search("tensor", 0, None).unwrap().is_empty());
    }

    #[test]
    fn test_question_mark_query_is_lenient() {
        let dir = tempfile::tempdir().unwrap();
        let index = Bm25Index::open_or_create(dir.path()).unwrap();
        let id = Uuid::new_v4();
        index
            .index_chunks("docs", &[chunk(id, "a.txt", "what is the tensor parallel size")])
            .unwrap();
        let hits = index.search("what is \"tensor parallel?", 5, None).unwrap();
        assert!(!hits.is_empty());
    }

    #[test]
    fn test_doc_count_tracks_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let index = Bm25Index::open_or_create(dir.path()).unwrap();
        let id = Uuid::new_v4();
        index
            .index_chunks(
                "docs",
                &[chunk(id, "a.txt", "alpha"), chunk(id, "b.txt", "beta")],
            )
            .unwrap();
        assert_eq!(index.doc_count(), 2);
        index.delete_source(&id).unwrap();
        assert_eq!(index.doc_count(), 0);
    }

    #[test]
    fn test_reopen_keeps_documents() {
        let dir = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();
        {
            let index = Bm25Index::open_or_create(dir.path()).unwrap();
            index
                .index_chunks("docs", &[chunk(id, "a.txt", "persistent triton notes")])
                .unwrap();
        }
        let index = Bm25Index::open_or_create(dir.path()).unwrap();
        let hits = index.search("triton", 5, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_name, "docs");
        assert_eq!(hits[0].source_id, id);
    }

    #[test]
    fn test_source_filter_fills_limit_when_other_sources_dominate() {
        let dir = tempfile::tempdir().unwrap();
        let index = Bm25Index::open_or_create(dir.path()).unwrap();
        let loud = Uuid::new_v4();
        let quiet = Uuid::new_v4();

        // 50 strong matches from one source, 3 weak ones from another
        let strong: Vec<DocumentChunk> = (0..50)
            .map(|i| chunk(loud, &format!("loud_{i}.txt"), "triton triton triton triton"))
            .collect();
        index.index_chunks("loud", &strong).unwrap();
        let weak: Vec<DocumentChunk> = (0..3)
            .map(|i| {
                chunk(
                    quiet,
                    &format!("quiet_{i}.txt"),
                    "a long note that mentions triton once among many other words here",
                )
            })
            .collect();
        index.index_chunks("quiet", &weak).unwrap();

        let hits = index.search("triton", 3, Some(&[quiet])).unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|h| h.source_id == quiet));

        assert!(index.search("triton", 3, Some(&[])).unwrap().is_empty());
    }
}
