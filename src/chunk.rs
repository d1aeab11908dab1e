//! Paragraph-boundary text chunker.
//!
//! Splits a [`Document`]'s content into [`Chunk`]s that respect a
//! configurable `max_tokens` limit. Splitting occurs on paragraph
//! boundaries (`\n\n`) where possible; oversized paragraphs are hard-split
//! at the nearest newline or space.
//!
//! Whitespace-only documents produce no chunks, so they never reach the
//! embedding API.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{Chunk, Document};

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split a document into chunks with contiguous indices starting at 0.
pub fn chunk_document(doc: &Document, max_tokens: usize) -> Vec<Chunk> {
    let metadata_json = serde_json::to_string(&doc.metadata).unwrap_or_else(|_| "{}".to_string());
    chunk_text(&doc.content, max_tokens)
        .into_iter()
        .enumerate()
        .map(|(i, text)| make_chunk(doc.file_path(), i as i64, &text, &metadata_json))
        .collect()
}

/// Split text into pieces on paragraph boundaries, respecting `max_tokens`.
pub fn chunk_text(text: &str, max_tokens: usize) -> Vec<String> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;

    let mut pieces = Vec::new();
    let mut current_buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        // If adding this paragraph would exceed max, flush current buffer
        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current_buf.is_empty() {
            pieces.push(std::mem::take(&mut current_buf));
        }

        if trimmed.len() > max_chars {
            // Hard split at max_chars boundaries
            let mut remaining = trimmed;
            while !remaining.is_empty() {
                let split_at = floor_char_boundary(remaining, max_chars);
                let actual_split = if split_at < remaining.len() {
                    remaining[..split_at]
                        .rfind('\n')
                        .or_else(|| remaining[..split_at].rfind(' '))
                        .map(|pos| pos + 1)
                        .unwrap_or(split_at)
                } else {
                    split_at
                };
                let piece = remaining[..actual_split].trim();
                if !piece.is_empty() {
                    pieces.push(piece.to_string());
                }
                remaining = &remaining[actual_split..];
            }
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        pieces.push(current_buf);
    }

    pieces
}

/// Largest byte index `<= max` that falls on a char boundary (at least one char).
fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut idx = max;
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    if idx == 0 {
        s.chars().next().map(char::len_utf8).unwrap_or(s.len())
    } else {
        idx
    }
}

fn make_chunk(file_path: &str, index: i64, text: &str, metadata_json: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        chunk_index: index,
        file_path: file_path.to_string(),
        text: text.to_string(),
        hash,
        metadata_json: metadata_json.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("Hello, world!", 700);
        assert_eq!(chunks, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn test_empty_text_no_chunks() {
        assert!(chunk_text("", 700).is_empty());
        assert!(chunk_text("  \n\n \n", 700).is_empty());
    }

    #[test]
    fn test_multiple_paragraphs_under_limit() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = chunk_text(text, 700);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("First paragraph."));
        assert!(chunks[0].contains("Third paragraph."));
    }

    #[test]
    fn test_multiple_paragraphs_exceed_limit() {
        // max_tokens=5 => max_chars=20
        let text = "This is paragraph one.\n\nThis is paragraph two.\n\nThis is paragraph three.";
        let chunks = chunk_text(text, 5);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(!c.is_empty());
        }
    }

    #[test]
    fn test_multibyte_text_does_not_panic() {
        let text = "héllo wörld ".repeat(40);
        let chunks = chunk_text(&text, 3);
        assert!(!chunks.is_empty());
        assert_eq!(chunks.concat().replace(' ', ""), text.replace(' ', ""));
    }

    #[test]
    fn test_document_chunks_carry_path_and_indices() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let doc = Document::new(text).with_metadata("file_path", "docs/guide.md");
        let chunks = chunk_document(&doc, 10);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64, "Index mismatch at position {}", i);
            assert_eq!(c.file_path, "docs/guide.md");
            assert!(c.metadata_json.contains("docs/guide.md"));
        }
    }

    #[test]
    fn test_deterministic() {
        let doc = Document::new("Alpha\n\nBeta\n\nGamma\n\nDelta");
        let c1 = chunk_document(&doc, 5);
        let c2 = chunk_document(&doc, 5);
        assert_eq!(c1.len(), c2.len());
        for (a, b) in c1.iter().zip(c2.iter()) {
            assert_eq!(a.text, b.text);
            assert_eq!(a.hash, b.hash);
            assert_eq!(a.chunk_index, b.chunk_index);
        }
    }
}
