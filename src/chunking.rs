//! Sentence-respecting text chunking with overlap.
//!
//! Documents are split into bounded chunks that keep whole sentences together
//! wherever possible. Adjacent chunks share an overlap region so retrieval
//! context survives chunk boundaries. Chunking is deterministic: identical
//! input and parameters always produce identical chunk sequences.

use serde::{Deserialize, Serialize};

use crate::types::PipelineError;

/// Chunk sizing shared by ingestion and retrieval re-derivation.
///
/// Both sides of the pipeline must agree on these values: ingestion uses
/// them to cut documents into chunks, and
/// [`read_chunk_content`](crate::retrieval::read_chunk_content) uses
/// `max_size` to slice the same window back out of the source document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingParams {
    /// Maximum chunk length in characters.
    pub max_size: usize,
    /// Characters carried over from the end of one chunk into the next.
    pub overlap: usize,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            max_size: 1000,
            overlap: 100,
        }
    }
}

impl ChunkingParams {
    pub fn new(max_size: usize, overlap: usize) -> Self {
        Self { max_size, overlap }
    }

    /// Chunks `text` with these parameters. See [`chunk_text`].
    pub fn chunk(&self, text: &str) -> Result<Vec<String>, PipelineError> {
        chunk_text(text, self.max_size, self.overlap)
    }
}

/// Splits `text` into sentence-respecting chunks of at most `max_size`
/// characters, seeding each chunk with the trailing `overlap` characters of
/// its predecessor.
///
/// A sentence ends at `.`, `?`, or `!` followed by whitespace. Sentences are
/// accumulated greedily; when the next sentence would push the buffer past
/// `max_size`, the buffer is emitted (whitespace-trimmed) and the next buffer
/// starts from the emitted buffer's trailing `overlap` characters. A single
/// sentence longer than `max_size` is hard-split into windows of `max_size`
/// characters advancing by `max_size - overlap`.
///
/// Empty input yields zero chunks. `overlap >= max_size` and `max_size == 0`
/// are rejected with [`PipelineError::Chunking`]. All counts are Unicode
/// scalar counts, never byte offsets.
pub fn chunk_text(
    text: &str,
    max_size: usize,
    overlap: usize,
) -> Result<Vec<String>, PipelineError> {
    if max_size == 0 {
        return Err(PipelineError::Chunking(
            "max_size must be greater than zero".to_string(),
        ));
    }
    if overlap >= max_size {
        return Err(PipelineError::Chunking(format!(
            "overlap {overlap} must be smaller than max_size {max_size}"
        )));
    }

    let mut chunks = Vec::new();
    let mut buffer = String::new();
    let mut buffer_len = 0usize;

    for sentence in split_sentences(text) {
        let sentence_len = sentence.chars().count();
        let trimmed_len = sentence.trim().chars().count();

        if trimmed_len > max_size {
            if !buffer.trim().is_empty() {
                chunks.push(buffer.trim().to_string());
            }
            buffer.clear();
            buffer_len = 0;
            hard_split(sentence.trim(), max_size, overlap, &mut chunks);
            continue;
        }

        if buffer_len + sentence_len > max_size && !buffer.trim().is_empty() {
            chunks.push(buffer.trim().to_string());
            // Seed the next buffer with the previous buffer's tail. The seed
            // is shortened when the incoming sentence leaves no room, so an
            // emitted chunk never exceeds max_size.
            let seed_len = overlap.min(max_size.saturating_sub(sentence_len));
            buffer = tail_chars(&buffer, seed_len);
            buffer_len = buffer.chars().count();
        }

        buffer.push_str(&sentence);
        buffer_len += sentence_len;
    }

    if !buffer.trim().is_empty() {
        chunks.push(buffer.trim().to_string());
    }

    Ok(chunks)
}

/// Splits text into sentences, keeping each terminator and the whitespace
/// that follows it attached to its sentence. Trailing text without a
/// terminator forms the final sentence.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '?' | '!') && chars.peek().is_some_and(|n| n.is_whitespace()) {
            while let Some(&next) = chars.peek() {
                if !next.is_whitespace() {
                    break;
                }
                current.push(next);
                chars.next();
            }
            sentences.push(std::mem::take(&mut current));
        }
    }

    if !current.is_empty() {
        sentences.push(current);
    }

    sentences
}

/// Emits fixed-size windows over an oversized sentence, each window at most
/// `max_size` characters, advancing by `max_size - overlap` (always >= 1
/// because `overlap < max_size` is checked by the caller).
fn hard_split(sentence: &str, max_size: usize, overlap: usize, chunks: &mut Vec<String>) {
    let chars: Vec<char> = sentence.chars().collect();
    let step = max_size - overlap;
    let mut start = 0;

    while start < chars.len() {
        let end = usize::min(start + max_size, chars.len());
        let window: String = chars[start..end].iter().collect();
        let window = window.trim();
        if !window.is_empty() {
            chunks.push(window.to_string());
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }
}

fn tail_chars(s: &str, n: usize) -> String {
    if n == 0 {
        return String::new();
    }
    let count = s.chars().count();
    s.chars().skip(count.saturating_sub(n)).collect()
}
