//! Paragraph-boundary text chunker with token overlap.
//!
//! Splits document text into [`Chunk`]s that respect a configurable
//! `max_tokens` limit. Splitting occurs on paragraph boundaries (`\n\n`)
//! to preserve semantic coherence; consecutive chunks share roughly
//! `overlap_tokens` of trailing context so facts that straddle a boundary
//! stay retrievable.
//!
//! # Algorithm
//!
//! 1. Convert token limits to character limits using a 4 chars/token ratio.
//! 2. Split text on `\n\n`; hard-split any paragraph longer than the limit
//!    at the nearest newline or space.
//! 3. Accumulate pieces into a buffer until the next one would overflow.
//! 4. On flush, seed the next buffer with the word-aligned tail of the
//!    flushed chunk (the overlap), unless that tail would itself overflow.
//! 5. Guarantee at least one chunk per document (even for empty text).
//!
//! Chunk IDs are derived from the document ID and chunk index, so
//! re-chunking unchanged text yields identical chunks.

use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split text into overlapping chunks.
///
/// # Guarantees
///
/// - At least one chunk is always returned.
/// - Chunk indices are contiguous: `0, 1, 2, …, N-1`.
/// - No chunk exceeds `max_tokens × 4` bytes.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Chunk> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let overlap_chars = overlap_tokens * CHARS_PER_TOKEN;

    let mut pieces: Vec<&str> = Vec::new();
    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.len() > max_chars {
            pieces.extend(hard_split(trimmed, max_chars));
        } else {
            pieces.push(trimmed);
        }
    }

    let mut chunks = Vec::new();
    let mut buf = String::new();
    // Bytes of `buf` that were carried over from the previous chunk.
    let mut carried = 0usize;

    for piece in pieces {
        let would_be = if buf.is_empty() {
            piece.len()
        } else {
            buf.len() + 2 + piece.len()
        };

        if would_be > max_chars && buf.len() > carried {
            let tail = overlap_tail(&buf, overlap_chars).to_string();
            chunks.push(make_chunk(document_id, chunks.len() as i64, &buf));
            buf.clear();
            carried = 0;
            if !tail.is_empty() && tail.len() + 2 + piece.len() <= max_chars {
                buf.push_str(&tail);
                carried = buf.len();
            }
        } else if would_be > max_chars {
            // Only carried-over context in the buffer; drop it.
            buf.clear();
            carried = 0;
        }

        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(piece);
    }

    if buf.len() > carried {
        chunks.push(make_chunk(document_id, chunks.len() as i64, &buf));
    }

    if chunks.is_empty() {
        chunks.push(make_chunk(document_id, 0, text.trim()));
    }

    chunks
}

/// Split an oversized paragraph at newline or space boundaries.
fn hard_split(paragraph: &str, max_chars: usize) -> Vec<&str> {
    let mut out = Vec::new();
    let mut remaining = paragraph;
    while !remaining.is_empty() {
        if remaining.len() <= max_chars {
            out.push(remaining);
            break;
        }
        let limit = snap_to_char_boundary(remaining, max_chars);
        let split_at = remaining[..limit]
            .rfind('\n')
            .or_else(|| remaining[..limit].rfind(' '))
            .map(|pos| pos + 1)
            .unwrap_or(limit);
        // A single character wider than the limit still has to make progress.
        let split_at = if split_at == 0 {
            remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len())
        } else {
            split_at
        };
        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            out.push(piece);
        }
        remaining = remaining[split_at..].trim_start();
    }
    out
}

/// The last `overlap_chars` bytes of `text`, advanced to a word start.
fn overlap_tail(text: &str, overlap_chars: usize) -> &str {
    if overlap_chars == 0 || text.is_empty() {
        return "";
    }
    let mut start = text.len().saturating_sub(overlap_chars);
    while start < text.len() && !text.is_char_boundary(start) {
        start += 1;
    }
    if start > 0 {
        if let Some(pos) = text[start..].find(char::is_whitespace) {
            start += pos;
        }
    }
    text[start..].trim()
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

pub(crate) fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    let hash = format!("{:x}", Sha256::digest(text.as_bytes()));
    let id = format!(
        "{:x}",
        Sha256::digest(format!("{}#{}", document_id, index).as_bytes())
    );

    Chunk {
        id: id[..32].to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
