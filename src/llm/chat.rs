use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

use crate::config::ChatConfig;
use crate::models::RankedDocument;

/// Longest question accepted, in bytes.
pub const MAX_QUESTION_LEN: usize = 2000;

/// Control tokens of common chat templates, stripped from untrusted text.
const CONTROL_TOKENS: &[&str] = &[
    "<|im_start|>",
    "<|im_end|>",
    "<|begin_of_text|>",
    "<|start_header_id|>",
    "<|end_header_id|>",
    "<|eot_id|>",
    "<|endoftext|>",
    "[INST]",
    "[/INST]",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Answer `question` from the reranked passages with an OpenAI-compatible
/// chat completion endpoint.
pub async fn generate_answer(
    client: &reqwest::Client,
    config: &ChatConfig,
    question: &str,
    context: &[RankedDocument],
) -> Result<String> {
    let question = sanitize_for_prompt(&truncate_to_char_boundary(question, MAX_QUESTION_LEN));
    let messages = build_messages(build_system_prompt(), &build_context(context), &question);
    call_chat(client, config, messages).await
}

pub fn build_system_prompt() -> String {
    String::from(
        "You are a helpful assistant answering questions from retrieved documents.\n\
         Each user message includes numbered passages ranked by relevance.\n\
         Answer ONLY from those passages. If they do not contain the answer, say so.\n\
         Cite passages by their number in square brackets, e.g. [1].",
    )
}

/// Format reranked passages as numbered context, best first.
pub fn build_context(ranked: &[RankedDocument]) -> String {
    let mut ctx = String::from("Passages:\n\n");

    if ranked.is_empty() {
        ctx.push_str("(No relevant passages were found for this question.)\n");
        return ctx;
    }

    for doc in ranked {
        let c = &doc.candidate;
        // Writing to a String cannot fail
        let _ = write!(
            ctx,
            "[{}] {}: {} (lines {}-{})\n{}\n\n",
            doc.rank,
            c.source_name,
            c.doc_path,
            c.start_line,
            c.end_line,
            sanitize_for_prompt(&c.content)
        );
    }

    ctx
}

pub fn build_messages(system_prompt: String, context_block: &str, question: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage {
            role: "system".to_string(),
            content: system_prompt,
        },
        // Context goes in the user turn so smaller models attend to it
        ChatMessage {
            role: "user".to_string(),
            content: format!("{context_block}---\nQuestion: {question}"),
        },
    ]
}

/// Remove chat-template control tokens from untrusted text. Repeats until
/// none are left, since removing one can join the halves of another.
pub fn sanitize_for_prompt(text: &str) -> String {
    let mut out = text.to_string();
    while let Some(token) = CONTROL_TOKENS.iter().find(|t| out.contains(*t)) {
        out = out.replace(token, "");
    }
    out
}

pub fn truncate_to_char_boundary(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    s.char_indices()
        .take_while(|(i, c)| i + c.len_utf8() <= max_len)
        .map(|(_, c)| c)
        .collect()
}

// ─── OpenAI-compatible ───────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

async fn call_chat(
    client: &reqwest::Client,
    config: &ChatConfig,
    messages: Vec<ChatMessage>,
) -> Result<String> {
    let url = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));

    let req = ChatRequest {
        model: &config.model,
        messages,
        temperature: config.temperature,
        max_tokens: config.max_tokens,
        stream: false,
    };

    let mut request = client.post(&url).json(&req);
    if let Some(key) = config.api_key.as_deref().filter(|k| !k.is_empty()) {
        request = request.header("Authorization", format!("Bearer {key}"));
    }

    let resp = request
        .send()
        .await
        .context("Failed to call chat completion API")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("Chat completion API returned {status}: {body}");
    }

    let body: ChatResponse = resp
        .json()
        .await
        .context("Failed to parse chat completion response")?;

    body.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .context("Chat completion returned no content")
}
