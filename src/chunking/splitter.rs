//! Recursive text splitter for prose and mixed documents.
//!
//! Splitting order:
//! 1. Paragraphs (runs of non-blank lines)
//! 2. Single lines, when a paragraph exceeds the chunk size
//! 3. Sentence / word boundaries inside a line that is still too long
//! 4. Last resort: a hard cut on a char boundary
//!
//! Units are then packed greedily up to the chunk size. Consecutive line-based
//! chunks share trailing lines of up to `chunk_overlap` characters.

use super::ChunkOutput;

/// A piece of the document no larger than the chunk size.
enum Unit {
    /// Inclusive range of line indices.
    Lines { start: usize, end: usize },
    /// Fragment of a single overlong line.
    Piece { line: usize, text: String },
}

/// Split `content` into chunks of at most `chunk_size` characters.
pub fn split_text(content: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<ChunkOutput> {
    if content.trim().is_empty() {
        return Vec::new();
    }

    let chunk_size = chunk_size.max(1);
    let chunk_overlap = if chunk_overlap >= chunk_size {
        chunk_size / 2
    } else {
        chunk_overlap
    };

    let lines: Vec<&str> = content.lines().collect();
    let units = collect_units(&lines, chunk_size);

    let mut chunks = Vec::new();
    // Current open range of lines, if any
    let mut current: Option<(usize, usize)> = None;

    for unit in units {
        match unit {
            Unit::Piece { line, text } => {
                if let Some((s, e)) = current.take() {
                    push_lines(&lines, s, e, &mut chunks);
                }
                if !text.trim().is_empty() {
                    chunks.push(ChunkOutput {
                        content: text,
                        start_line: line + 1,
                        end_line: line + 1,
                    });
                }
            }
            Unit::Lines { start, end } => {
                current = match current {
                    None => Some((start, end)),
                    Some((s, _)) if span_len(&lines, s, end) <= chunk_size => Some((s, end)),
                    Some((s, e)) => {
                        push_lines(&lines, s, e, &mut chunks);
                        let carry = overlap_start(&lines, s, e, chunk_overlap)
                            .filter(|&j| j < start && span_len(&lines, j, end) <= chunk_size);
                        Some((carry.unwrap_or(start), end))
                    }
                };
            }
        }
    }

    if let Some((s, e)) = current {
        push_lines(&lines, s, e, &mut chunks);
    }

    chunks
}

fn push_lines(lines: &[&str], start: usize, end: usize, chunks: &mut Vec<ChunkOutput>) {
    let text = lines[start..=end].join("\n");
    if text.trim().is_empty() {
        return;
    }
    chunks.push(ChunkOutput {
        content: text,
        start_line: start + 1,
        end_line: end + 1,
    });
}

/// Length in chars of `lines[start..=end]` joined with newlines.
fn span_len(lines: &[&str], start: usize, end: usize) -> usize {
    lines[start..=end]
        .iter()
        .map(|l| l.chars().count())
        .sum::<usize>()
        + (end - start)
}

/// First line index in `(start, end]` whose tail span fits in `overlap` chars.
fn overlap_start(lines: &[&str], start: usize, end: usize, overlap: usize) -> Option<usize> {
    if overlap == 0 {
        return None;
    }
    let mut best = None;
    let mut j = end;
    while j > start {
        if span_len(lines, j, end) > overlap {
            break;
        }
        best = Some(j);
        j -= 1;
    }
    best
}

fn collect_units(lines: &[&str], chunk_size: usize) -> Vec<Unit> {
    let mut units = Vec::new();

    for (start, end) in paragraphs(lines) {
        if span_len(lines, start, end) <= chunk_size {
            units.push(Unit::Lines { start, end });
            continue;
        }
        for i in start..=end {
            if lines[i].chars().count() <= chunk_size {
                units.push(Unit::Lines { start: i, end: i });
            } else {
                for text in split_long_line(lines[i], chunk_size) {
                    units.push(Unit::Piece { line: i, text });
                }
            }
        }
    }

    units
}

/// Inclusive line ranges of non-blank runs.
fn paragraphs(lines: &[&str]) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut para_start = None;

    for (i, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            if let Some(start) = para_start.take() {
                out.push((start, i - 1));
            }
        } else if para_start.is_none() {
            para_start = Some(i);
        }
    }

    if let Some(start) = para_start {
        out.push((start, lines.len() - 1));
    }

    out
}

/// Split an overlong line at sentence, then word boundaries, hard-cutting words
/// that alone exceed `max_chars`.
fn split_long_line(line: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut buf = String::new();
    let mut buf_chars = 0usize;

    for token in split_keep_separator(line, max_chars) {
        let token_chars = token.chars().count();

        if token_chars > max_chars {
            if !buf.is_empty() {
                pieces.push(std::mem::take(&mut buf));
                buf_chars = 0;
            }
            pieces.extend(hard_cut(token, max_chars));
            continue;
        }

        if buf_chars + token_chars > max_chars && !buf.is_empty() {
            pieces.push(std::mem::take(&mut buf));
            buf_chars = 0;
        }
        buf.push_str(token);
        buf_chars += token_chars;
    }

    if !buf.is_empty() {
        pieces.push(buf);
    }

    pieces
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Sentence tokens (ending after ". ", "? " or "! "). Sentences longer than
/// `max_chars` are broken into word tokens.
fn split_keep_separator(line: &str, max_chars: usize) -> Vec<&str> {
    let bytes = line.as_bytes();
    let mut sentences = Vec::new();
    let mut last = 0;

    for (i, &b) in bytes.iter().enumerate() {
        if b == b' ' && i > 0 && matches!(bytes[i - 1], b'.' | b'?' | b'!') {
            sentences.push(&line[last..=i]);
            last = i + 1;
        }
    }
    if last < line.len() {
        sentences.push(&line[last..]);
    }

    let mut tokens = Vec::new();
    for sentence in sentences {
        if sentence.chars().count() <= max_chars {
            tokens.push(sentence);
            continue;
        }
        let mut start = 0;
        for (i, c) in sentence.char_indices() {
            if c == ' ' {
                tokens.push(&sentence[start..=i]);
                start = i + 1;
            }
        }
        if start < sentence.len() {
            tokens.push(&sentence[start..]);
        }
    }

    tokens
}

fn hard_cut(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars)
        .map(|c| c.iter().collect::<String>())
        .collect()
}
