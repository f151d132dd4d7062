use std::collections::HashMap;
use uuid::Uuid;

use crate::models::{Candidate, Retriever};
use crate::search::bm25::Bm25Hit;
use crate::search::vector::VectorHit;

/// RRF constant.
pub const RRF_K: f32 = 60.0;

impl From<&Bm25Hit> for Candidate {
    fn from(hit: &Bm25Hit) -> Self {
        Candidate {
            source_id: hit.source_id,
            source_name: hit.source_name.clone(),
            doc_path: hit.doc_path.clone(),
            chunk_index: hit.chunk_index,
            content: hit.content.clone(),
            kind: hit.kind.clone(),
            start_line: hit.start_line,
            end_line: hit.end_line,
            retriever: Retriever::Bm25,
            store_score: hit.score,
            also_from: Vec::new(),
        }
    }
}

impl From<&VectorHit> for Candidate {
    fn from(hit: &VectorHit) -> Self {
        Candidate {
            source_id: hit.source_id,
            source_name: hit.source_name.clone(),
            doc_path: hit.doc_path.clone(),
            chunk_index: hit.chunk_index,
            content: hit.content.clone(),
            kind: hit.kind.clone(),
            start_line: hit.start_line,
            end_line: hit.end_line,
            retriever: Retriever::Vector,
            store_score: hit.score,
            also_from: Vec::new(),
        }
    }
}

/// Concatenate lexical and semantic results: BM25 hits first, then vector hits,
/// each in store order. Duplicates are kept.
pub fn concatenate(bm25_hits: &[Bm25Hit], vector_hits: &[VectorHit]) -> Vec<Candidate> {
    bm25_hits
        .iter()
        .map(Candidate::from)
        .chain(vector_hits.iter().map(Candidate::from))
        .collect()
}

/// Merge candidates that point at the same chunk. The first occurrence wins and
/// records the other retrievers in `also_from`.
pub fn dedup_candidates(candidates: Vec<Candidate>) -> Vec<Candidate> {
    type Key = (Uuid, String, usize);
    let mut position: HashMap<Key, usize> = HashMap::new();
    let mut out: Vec<Candidate> = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        let key: Key = (
            candidate.source_id,
            candidate.doc_path.clone(),
            candidate.chunk_index,
        );
        match position.get(&key) {
            Some(&i) => {
                let kept = &mut out[i];
                if kept.retriever != candidate.retriever
                    && !kept.also_from.contains(&candidate.retriever)
                {
                    kept.also_from.push(candidate.retriever);
                }
            }
            None => {
                position.insert(key, out.len());
                out.push(candidate);
            }
        }
    }

    out
}

/// Reciprocal Rank Fusion of the two result lists, used when no remote reranker
/// is available. Returns deduplicated candidates with their fused score, best first.
pub fn rrf_fusion(
    bm25_hits: &[Bm25Hit],
    vector_hits: &[VectorHit],
    limit: usize,
) -> Vec<(Candidate, f32)> {
    type Key = (Uuid, String, usize);
    let mut score_map: HashMap<Key, (Candidate, f32)> = HashMap::new();
    // First-seen order, for stable tie-breaking
    let mut order: Vec<Key> = Vec::new();

    let lists: [Vec<Candidate>; 2] = [
        bm25_hits.iter().map(Candidate::from).collect(),
        vector_hits.iter().map(Candidate::from).collect(),
    ];

    for list in lists {
        for (rank, candidate) in list.into_iter().enumerate() {
            let key: Key = (
                candidate.source_id,
                candidate.doc_path.clone(),
                candidate.chunk_index,
            );
            let rrf_score = 1.0 / (RRF_K + rank as f32 + 1.0);

            match score_map.get_mut(&key) {
                Some((kept, score)) => {
                    *score += rrf_score;
                    if kept.retriever != candidate.retriever
                        && !kept.also_from.contains(&candidate.retriever)
                    {
                        kept.also_from.push(candidate.retriever);
                    }
                }
                None => {
                    order.push(key.clone());
                    score_map.insert(key, (candidate, rrf_score));
                }
            }
        }
    }

    let mut results: Vec<(Candidate, f32)> = order
        .into_iter()
        .filter_map(|key| score_map.remove(&key))
        .collect();
    // sort_by is stable, so ties keep first-seen order
    results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(limit);
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bm25_hit(id: Uuid, path: &str, chunk: usize, score: f32) -> Bm25Hit {
        Bm25Hit {
            source_id: id,
            source_name: "test-docs".to_string(),
            doc_path: path.to_string(),
            chunk_index: chunk,
            content: format!("content of {path} chunk {chunk}"),
            kind: "text".to_string(),
            start_line: 1,
            end_line: 10,
            score,
        }
    }

    fn make_vector_hit(id: Uuid, path: &str, chunk: usize, score: f32) -> VectorHit {
        VectorHit {
            source_id: id,
            source_name: "test-docs".to_string(),
            doc_path: path.to_string(),
            chunk_index: chunk,
            content: format!("content of {path} chunk {chunk}"),
            kind: "text".to_string(),
            start_line: 1,
            end_line: 10,
            score,
        }
    }

    #[test]
    fn test_concatenate_keeps_order_and_duplicates() {
        let id = Uuid::new_v4();
        let bm25 = vec![make_bm25_hit(id, "a.md", 0, 4.0), make_bm25_hit(id, "b.md", 0, 2.0)];
        let vector = vec![make_vector_hit(id, "b.md", 0, 0.9), make_vector_hit(id, "c.md", 0, 0.7)];

        let combined = concatenate(&bm25, &vector);
        let paths: Vec<&str> = combined.iter().map(|c| c.doc_path.as_str()).collect();
        assert_eq!(paths, vec!["a.md", "b.md", "b.md", "c.md"]);
        assert_eq!(combined[0].retriever, Retriever::Bm25);
        assert_eq!(combined[2].retriever, Retriever::Vector);
        assert_eq!(combined[2].store_score, 0.9);
    }

    #[test]
    fn test_concatenate_empty() {
        assert!(concatenate(&[], &[]).is_empty());
    }

    #[test]
    fn test_dedup_merges_same_chunk() {
        let id = Uuid::new_v4();
        let combined = concatenate(
            &[make_bm25_hit(id, "a.md", 0, 4.0), make_bm25_hit(id, "a.md", 1, 3.0)],
            &[make_vector_hit(id, "a.md", 0, 0.9)],
        );
        let deduped = dedup_candidates(combined);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].retriever, Retriever::Bm25);
        assert_eq!(deduped[0].also_from, vec![Retriever::Vector]);
        assert!(deduped[1].also_from.is_empty());
    }

    #[test]
    fn test_dedup_distinguishes_sources() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let combined = concatenate(
            &[make_bm25_hit(a, "readme.md", 0, 1.0)],
            &[make_vector_hit(b, "readme.md", 0, 0.5)],
        );
        assert_eq!(dedup_candidates(combined).len(), 2);
    }

    #[test]
    fn test_rrf_rewards_agreement() {
        let id = Uuid::new_v4();
        // a.md: rank 0 BM25, rank 1 vector; b.md: rank 1 BM25, rank 0 vector; c.md BM25 only
        let bm25 = vec![
            make_bm25_hit(id, "a.md", 0, 5.0),
            make_bm25_hit(id, "b.md", 0, 3.0),
            make_bm25_hit(id, "c.md", 0, 1.0),
        ];
        let vector = vec![make_vector_hit(id, "b.md", 0, 0.95), make_vector_hit(id, "a.md", 0, 0.8)];

        let fused = rrf_fusion(&bm25, &vector, 10);
        assert_eq!(fused.len(), 3);
        assert_eq!(fused[2].0.doc_path, "c.md");
        // a.md and b.md tie; a.md was seen first
        assert_eq!(fused[0].0.doc_path, "a.md");
        assert_eq!(fused[0].0.also_from, vec![Retriever::Vector]);
    }

    #[test]
    fn test_rrf_score_value() {
        let id = Uuid::new_v4();
        let fused = rrf_fusion(&[make_bm25_hit(id, "a.md", 0, 5.0)], &[], 10);
        let expected = 1.0 / (RRF_K + 1.0);
        assert!((fused[0].1 - expected).abs() < 1e-6);
    }

    #[test]
    fn test_rrf_limit_respected() {
        let id = Uuid::new_v4();
        let bm25: Vec<_> = (0..50)
            .map(|i| make_bm25_hit(id, &format!("doc_{i}.md"), 0, 50.0 - i as f32))
            .collect();
        assert_eq!(rrf_fusion(&bm25, &[], 5).len(), 5);
    }
}
