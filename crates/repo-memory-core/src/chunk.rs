//! Line-boundary text chunker with trailing overlap.
//!
//! Splits text into [`TextChunk`]s of roughly `max_chars` characters. Splits
//! only happen at line boundaries, and each chunk after the first starts
//! with the trailing lines of the previous one so that context carries
//! across chunk edges.
//!
//! Chunking is character based, not tokenizer based, so the output depends
//! only on the input text and the two parameters.
//!
//! # Algorithm
//!
//! 1. Split text into lines, keeping line terminators.
//! 2. Append lines to a buffer until its length reaches `max_chars`.
//! 3. Flush the buffer as a chunk, then seed the next buffer with the last
//!    `max(1, lines × overlap_ratio)` lines of the flushed chunk, unless
//!    that tail alone already reaches `max_chars`.
//! 4. Flush the remaining buffer only if it holds lines not yet emitted.
//! 5. Whitespace-only input yields no chunks.
//!
//! # Example
//!
//! ```rust
//! use repo_memory_core::chunk::chunk_lines;
//!
//! let chunks = chunk_lines("fn main() {}\n", 2048, 0.2);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].index, 0);
//! ```

use sha2::{Digest, Sha256};

/// Default chunk size in characters.
pub const DEFAULT_MAX_CHARS: usize = 2048;

/// Default fraction of a chunk's lines repeated at the start of the next.
pub const DEFAULT_OVERLAP_RATIO: f64 = 0.2;

/// A contiguous, line-aligned segment of a source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub index: usize,
    pub text: String,
}

/// Split `text` into overlapping line-aligned chunks.
///
/// Indices are contiguous from 0. Returns an empty vector for empty or
/// whitespace-only text.
pub fn chunk_lines(text: &str, max_chars: usize, overlap_ratio: f64) -> Vec<TextChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let max_chars = max_chars.max(1);
    let overlap_ratio = overlap_ratio.clamp(0.0, 1.0);

    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0usize;
    // Number of lines in `current` carried over from the previous chunk.
    let mut carried = 0usize;

    for line in text.split_inclusive('\n') {
        current.push(line);
        current_len += line.chars().count();

        if current_len >= max_chars {
            chunks.push(make_chunk(chunks.len(), &current));

            let keep = overlap_lines(current.len(), overlap_ratio);
            let tail = current.split_off(current.len() - keep);
            let tail_len: usize = tail.iter().map(|l| l.chars().count()).sum();
            if keep > 0 && tail_len < max_chars {
                current = tail;
                current_len = tail_len;
                carried = keep;
            } else {
                current.clear();
                current_len = 0;
                carried = 0;
            }
        }
    }

    if current.len() > carried {
        chunks.push(make_chunk(chunks.len(), &current));
    }

    chunks
}

fn overlap_lines(lines: usize, ratio: f64) -> usize {
    if ratio <= 0.0 || lines == 0 {
        return 0;
    }
    (((lines as f64) * ratio) as usize).max(1).min(lines)
}

fn make_chunk(index: usize, lines: &[&str]) -> TextChunk {
    TextChunk {
        index,
        text: lines.concat(),
    }
}

/// SHA-256 of `bytes`, rendered as `sha256:<hex>`.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_lines(n: usize, width: usize) -> String {
        (0..n)
            .map(|i| format!("{:0width$}\n", i, width = width))
            .collect()
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_lines("print('hello')\n", 2048, 0.2);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, "print('hello')\n");
    }

    #[test]
    fn test_whitespace_text_has_no_chunks() {
        assert!(chunk_lines("", 2048, 0.2).is_empty());
        assert!(chunk_lines("  \n\t\n", 2048, 0.2).is_empty());
    }

    #[test]
    fn test_trailing_overlap() {
        // 10 lines of 10 chars each, flush every 50 chars.
        let text = numbered_lines(10, 9);
        let chunks = chunk_lines(&text, 50, 0.2);
        assert_eq!(chunks.len(), 3);
        // First chunk: lines 0..5; overlap keeps line 4.
        assert!(chunks[0].text.starts_with("000000000\n"));
        assert!(chunks[1].text.starts_with("000000004\n"));
        assert!(chunks[1].text.ends_with("000000008\n"));
        assert!(chunks[2].text.starts_with("000000008\n"));
        assert!(chunks[2].text.ends_with("000000009\n"));
    }

    #[test]
    fn test_no_duplicate_tail_chunk() {
        // Exactly one flush; the carried line alone must not become a chunk.
        let text = numbered_lines(5, 9);
        let chunks = chunk_lines(&text, 50, 0.2);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_oversized_line_not_repeated() {
        let long = "x".repeat(100);
        let text = format!("{}\nshort\n", long);
        let chunks = chunk_lines(&text, 50, 0.2);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].text, "short\n");
    }

    #[test]
    fn test_chunk_indices_contiguous() {
        let text = numbered_lines(500, 20);
        let chunks = chunk_lines(&text, 300, 0.2);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i, "Index mismatch at position {}", i);
        }
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐\n│ Hello world      │\n└──────────────────┘";
        let chunks = chunk_lines(text, 10, 0.2);
        assert!(!chunks.is_empty());
        let last = chunks.last().unwrap();
        assert!(last.text.ends_with('┘'));
    }

    #[test]
    fn test_deterministic() {
        let text = numbered_lines(200, 30);
        let c1 = chunk_lines(&text, 512, 0.2);
        let c2 = chunk_lines(&text, 512, 0.2);
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_content_hash_format() {
        let h = content_hash(b"abc");
        assert_eq!(
            h,
            "sha256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
