//! Word-boundary text chunker.
//!
//! Splits article text into segments whose estimated token size stays within
//! `max_size`. The estimate is a heuristic: every whitespace-delimited word
//! weighs [`WORD_WEIGHT`] tokens. This is not an exact tokenizer.
//!
//! # Algorithm
//!
//! 1. Iterate words in order, keeping the current chunk and its size as a
//!    running `f64` sum (each word adds [`WORD_WEIGHT`]).
//! 2. If adding the next word would push the size over `max_size` **and**
//!    the current chunk is non-empty, close the chunk (words joined with
//!    single spaces) and start a new chunk seeded with that word.
//! 3. Otherwise append the word.
//! 4. Flush the trailing partial chunk.
//!
//! A word is never dropped: a single word heavier than `max_size` becomes a
//! chunk of its own. Chunk ids downstream are positional, so the boundary
//! rule must stay exactly as above.
//!
//! # Example
//!
//! ```rust
//! use pagewise_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("one two three four five", 3);
//! assert_eq!(chunks, vec!["one two", "three four", "five"]);
//! ```

/// Estimated tokens per word.
pub const WORD_WEIGHT: f64 = 1.3;

/// Chunk size used by the ingestion pipeline.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 1500;

/// Split `text` into ordered, non-empty chunks bounded by `max_size`
/// estimated tokens. Empty or whitespace-only text yields no chunks.
pub fn chunk_text(text: &str, max_size: usize) -> Vec<String> {
    let limit = max_size as f64;
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut size = 0.0_f64;

    for word in text.split_whitespace() {
        if size + WORD_WEIGHT > limit && !current.is_empty() {
            chunks.push(current.join(" "));
            current.clear();
            size = 0.0;
        }
        current.push(word);
        size += WORD_WEIGHT;
    }

    if !current.is_empty() {
        chunks.push(current.join(" "));
    }

    chunks
}

/// Estimated token size of a chunk holding `word_count` words, summed the
/// way [`chunk_text`] sums it.
pub fn estimate_size(word_count: usize) -> f64 {
    (0..word_count).fold(0.0, |size, _| size + WORD_WEIGHT)
}
