//! Fixed-size sliding-window text chunker.
//!
//! Splits document text into windows of `chunk_size` characters, each
//! starting `chunk_size - overlap` characters after the previous one. There
//! is no sentence or word boundary logic: offsets are counted in `char`s so
//! multi-byte text is never split inside a code point.
//!
//! # Example
//!
//! ```rust
//! use study_harness::chunk::chunk_text;
//!
//! let chunks = chunk_text("abcdefghij", 4, 1);
//! assert_eq!(chunks, vec!["abcd", "defg", "ghij", "j"]);
//! ```

use crate::config::ChunkingConfig;
use crate::models::Chunk;

/// Split `text` into overlapping windows.
///
/// Windows start at every multiple of `chunk_size - overlap` below the text
/// length; the final windows may be shorter than `chunk_size`. Empty text
/// (or a zero `chunk_size`) yields no windows.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if text.is_empty() || chunk_size == 0 {
        return Vec::new();
    }
    let step = chunk_size.saturating_sub(overlap).max(1);

    // Byte offset of every char boundary, including the end of the text.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = boundaries.len() - 1;

    let mut chunks = Vec::with_capacity(char_count / step + 1);
    let mut start = 0;
    while start < char_count {
        let end = (start + chunk_size).min(char_count);
        chunks.push(text[boundaries[start]..boundaries[end]].to_string());
        start += step;
    }
    chunks
}

/// Chunk a document's text and assign `"{filename}_{index}"` identifiers.
pub fn chunk_document(filename: &str, text: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    chunk_text(text, config.chunk_size, config.overlap)
        .into_iter()
        .enumerate()
        .map(|(i, window)| Chunk::new(filename, i, window))
        .collect()
}
