//! Paragraph-boundary text chunker with an overlap window.
//!
//! Splits a document body into [`Chunk`]s of at most `max_tokens` worth of
//! text, preferring paragraph boundaries (`\n\n`), then line and word
//! boundaries for oversized paragraphs. Every chunk after the first is
//! prefixed with the tail (`overlap_tokens`) of the chunk before it, so a
//! question that straddles a boundary still retrieves both sides.
//!
//! Splits always land on UTF-8 character boundaries; source files are
//! routinely non-ASCII.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split text into chunks with contiguous indices starting at 0.
///
/// Always returns at least one chunk.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Chunk> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let overlap_chars = overlap_tokens * CHARS_PER_TOKEN;

    let mut pieces: Vec<String> = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if buf.is_empty() {
            trimmed.len()
        } else {
            buf.len() + 2 + trimmed.len()
        };
        if would_be > max_chars && !buf.is_empty() {
            pieces.push(std::mem::take(&mut buf));
        }

        if trimmed.len() > max_chars {
            pieces.extend(hard_split(trimmed, max_chars).into_iter().map(str::to_string));
        } else {
            if !buf.is_empty() {
                buf.push_str("\n\n");
            }
            buf.push_str(trimmed);
        }
    }

    if !buf.is_empty() {
        pieces.push(buf);
    }
    if pieces.is_empty() {
        pieces.push(text.trim().to_string());
    }

    pieces
        .iter()
        .enumerate()
        .map(|(i, piece)| {
            let tail = if i > 0 && overlap_chars > 0 {
                overlap_tail(&pieces[i - 1], overlap_chars)
            } else {
                ""
            };
            if tail.is_empty() {
                make_chunk(document_id, i as i64, piece)
            } else {
                make_chunk(document_id, i as i64, &format!("{}\n{}", tail, piece))
            }
        })
        .collect()
}

/// Split an oversized paragraph at line or word boundaries.
fn hard_split(text: &str, max_chars: usize) -> Vec<&str> {
    let mut out = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_chars {
            let piece = remaining.trim();
            if !piece.is_empty() {
                out.push(piece);
            }
            break;
        }

        let limit = floor_char_boundary(remaining, max_chars);
        let mut split = remaining[..limit]
            .rfind('\n')
            .or_else(|| remaining[..limit].rfind(' '))
            .map(|pos| pos + 1)
            .unwrap_or(limit);
        if split == 0 {
            split = remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len());
        }

        let piece = remaining[..split].trim();
        if !piece.is_empty() {
            out.push(piece);
        }
        remaining = &remaining[split..];
    }

    out
}

/// The last `overlap_chars` bytes of `prev`, starting at a word boundary.
fn overlap_tail(prev: &str, overlap_chars: usize) -> &str {
    if prev.len() <= overlap_chars {
        return prev;
    }
    let mut start = prev.len() - overlap_chars;
    while !prev.is_char_boundary(start) {
        start += 1;
    }
    let tail = &prev[start..];
    match tail.find(char::is_whitespace) {
        Some(pos) => tail[pos..].trim_start(),
        None => tail,
    }
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
