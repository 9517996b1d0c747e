//! Whitespace text splitter.
//!
//! Splits extracted document text into overlapping windows of words. Word
//! boundaries are Unicode whitespace; runs of whitespace inside a window
//! collapse to a single space.
//!
//! # Algorithm
//!
//! 1. Tokenize on whitespace.
//! 2. Emit a window of `chunk_size` words.
//! 3. Advance by `chunk_size - overlap` words and repeat until the last
//!    word has been covered.
//!
//! Text with no words yields no chunks.
//!
//! # Example
//!
//! ```rust
//! use docqa_core::chunk::split_text;
//!
//! let chunks = split_text("one two three four five", 3, 1);
//! assert_eq!(chunks, vec!["one two three", "three four five"]);
//! ```

/// Split `text` into windows of at most `chunk_size` words, consecutive
/// windows sharing `overlap` words.
///
/// `chunk_size` of zero is treated as one; `overlap` is capped at
/// `chunk_size - 1` so the window always advances.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let size = chunk_size.max(1);
    let step = size - overlap.min(size - 1);

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + size).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += step;
    }
    chunks
}
