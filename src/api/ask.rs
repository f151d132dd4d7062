use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::api::search::clamp;
use crate::llm::chat::{generate_answer, MAX_QUESTION_LEN};
use crate::models::{AskRequest, AskResponse, Citation, RankedDocument};
use crate::pipeline::RetrieveOptions;
use crate::state::AppState;

/// Returned without calling the chat model when retrieval finds nothing.
pub const NO_CONTEXT_ANSWER: &str = "I could not find any passages relevant to this question.";

/// POST /api/ask - Retrieve and rerank passages, then answer from them
pub async fn ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, (StatusCode, String)> {
    let question = req.question.trim().to_string();
    if question.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Question is required".to_string()));
    }
    if question.len() > MAX_QUESTION_LEN {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("Question exceeds {MAX_QUESTION_LEN} bytes"),
        ));
    }

    let retrieval = &state.config.retrieval;
    let options = RetrieveOptions {
        top_n: clamp(req.top_n, state.config.reranker.top_n),
        bm25_k: retrieval.bm25_k,
        vector_k: retrieval.vector_k,
        source_ids: req.source_ids,
        ..RetrieveOptions::default()
    };

    let output = state
        .pipeline()
        .retrieve(&question, &options)
        .await
        .map_err(|e| {
            tracing::error!("Retrieval failed for question: {e:#}");
            (StatusCode::BAD_GATEWAY, format!("Retrieval failed: {e:#}"))
        })?;

    if output.ranked.is_empty() {
        return Ok(Json(AskResponse {
            question,
            answer: NO_CONTEXT_ANSWER.to_string(),
            citations: Vec::new(),
        }));
    }

    let answer = generate_answer(&state.http_client, &state.config.chat, &question, &output.ranked)
        .await
        .map_err(|e| {
            tracing::error!("Answer generation failed: {e:#}");
            (StatusCode::BAD_GATEWAY, format!("Answer generation failed: {e:#}"))
        })?;

    tracing::info!(
        "Answered from {} passages ranked by {}",
        output.ranked.len(),
        output.ranked_by
    );

    Ok(Json(AskResponse {
        question,
        answer,
        citations: citations(&output.ranked),
    }))
}

/// Citation numbers match the passage numbers used in the prompt.
fn citations(ranked: &[RankedDocument]) -> Vec<Citation> {
    ranked
        .iter()
        .map(|doc| Citation {
            index: doc.rank,
            source_name: doc.candidate.source_name.clone(),
            doc_path: doc.candidate.doc_path.clone(),
            start_line: doc.candidate.start_line,
            end_line: doc.candidate.end_line,
            score: doc.score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Candidate, Retriever};
    use uuid::Uuid;

    #[test]
    fn test_citations_follow_rank() {
        let ranked: Vec<RankedDocument> = ["a.md", "b.md"]
            .iter()
            .enumerate()
            .map(|(i, path)| RankedDocument {
                rank: i + 1,
                relevance_score: 1.0 - i as f32,
                score: 0.9 - i as f32 * 0.1,
                candidate: Candidate {
                    source_id: Uuid::nil(),
                    source_name: "docs".to_string(),
                    doc_path: path.to_string(),
                    chunk_index: 0,
                    content: String::new(),
                    kind: "markdown".to_string(),
                    start_line: 3,
                    end_line: 7,
                    retriever: Retriever::Bm25,
                    store_score: 1.0,
                    also_from: vec![],
                },
            })
            .collect();

        let cites = citations(&ranked);
        assert_eq!(cites.len(), 2);
        assert_eq!(cites[0].index, 1);
        assert_eq!(cites[1].doc_path, "b.md");
        assert_eq!(cites[1].start_line, 3);
    }
}
