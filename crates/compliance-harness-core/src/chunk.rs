//! Line-accumulating text chunker.
//!
//! Splits extracted document text into [`DocumentChunk`]s of roughly
//! `max_chars` characters. Statutes extracted from PDF have short, ragged
//! lines, so the chunker works on lines rather than paragraphs.
//!
//! # Algorithm
//!
//! 1. Split text on runs of newlines.
//! 2. Skip blank lines; trim the rest.
//! 3. Append each line to a buffer (joined by single spaces).
//! 4. As soon as the buffer reaches `max_chars` characters, cut a chunk.
//! 5. Flush the trailing partial buffer as the last chunk.
//!
//! A chunk therefore never exceeds `max_chars` by more than the length of
//! its last line. Empty text yields no chunks.
//!
//! Each chunk gets a deterministic id `<document_id>-<position>` and a
//! SHA-256 hash of its text, so an index rebuild can reuse embeddings for
//! chunks whose text did not change.
//!
//! # Example
//!
//! ```rust
//! use compliance_harness_core::chunk::chunk_document;
//!
//! let chunks = chunk_document("ley-19913", "Artículo 1\n\nArtículo 2", 1200);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].text, "Artículo 1 Artículo 2");
//! assert_eq!(chunks[0].id, "ley-19913-0");
//! ```

use sha2::{Digest, Sha256};

use crate::models::DocumentChunk;

/// Default chunk threshold, in characters.
pub const DEFAULT_MAX_CHARS: usize = 1200;

/// Split `text` into position-ordered chunks of about `max_chars` characters.
///
/// Returned chunks have empty embeddings; the retrieval engine fills them in.
pub fn chunk_document(document_id: &str, text: &str, max_chars: usize) -> Vec<DocumentChunk> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut buf_chars = 0usize;

    for line in text.split('\n') {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if !buf.is_empty() {
            buf.push(' ');
            buf_chars += 1;
        }
        buf.push_str(trimmed);
        buf_chars += trimmed.chars().count();

        if buf_chars >= max_chars {
            chunks.push(make_chunk(document_id, chunks.len(), &buf));
            buf.clear();
            buf_chars = 0;
        }
    }

    if !buf.is_empty() {
        chunks.push(make_chunk(document_id, chunks.len(), &buf));
    }

    chunks
}

/// SHA-256 of `text` as lowercase hex.
pub fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_chunk(document_id: &str, position: usize, text: &str) -> DocumentChunk {
    DocumentChunk {
        id: format!("{}-{}", document_id, position),
        document_id: document_id.to_string(),
        position,
        text: text.to_string(),
        hash: text_hash(text),
        embedding: Vec::new(),
    }
}
