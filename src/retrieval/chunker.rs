//! Recursive character text splitting for knowledge ingestion.
//!
//! Text is split on the coarsest separator present (paragraphs, then lines,
//! then sentences, then words, then characters). Pieces that are still too
//! large are split again with the finer separators, and adjacent small
//! pieces are merged back into chunks of at most `chunk_size` characters
//! with `chunk_overlap` characters carried over between neighbours.
//! Lengths are counted in characters, not bytes.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::warn;

/// Default separators, coarsest first. The empty separator splits into
/// single characters.
pub const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", "。", ".", " ", ""];

/// Splitter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextSplitter {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub separators: Vec<String>,
}

impl Default for TextSplitter {
    fn default() -> Self {
        Self::new(500, 50)
    }
}

impl TextSplitter {
    /// Create a splitter. Overlap is clamped below the chunk size.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_separators(mut self, separators: Vec<String>) -> Self {
        self.separators = separators;
        self
    }

    /// Split `text` into trimmed, non-empty chunks.
    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let position = separators
            .iter()
            .position(|s| s.is_empty() || text.contains(s.as_str()))
            .unwrap_or(separators.len().saturating_sub(1));
        let separator = separators.get(position).map(String::as_str).unwrap_or("");
        let finer = separators.get(position + 1..).unwrap_or(&[]);

        let mut chunks = Vec::new();
        let mut small = Vec::new();
        for piece in split_keeping_separator(text, separator) {
            if char_len(&piece) < self.chunk_size {
                small.push(piece);
                continue;
            }
            if !small.is_empty() {
                chunks.extend(self.merge(std::mem::take(&mut small)));
            }
            if finer.is_empty() {
                chunks.extend(trimmed(piece));
            } else {
                chunks.extend(self.split_recursive(&piece, finer));
            }
        }
        if !small.is_empty() {
            chunks.extend(self.merge(small));
        }
        chunks
    }

    /// Greedily join pieces into chunks, keeping up to `chunk_overlap`
    /// characters of trailing pieces at the start of the next chunk.
    fn merge(&self, pieces: Vec<String>) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut window: VecDeque<String> = VecDeque::new();
        let mut total = 0;

        for piece in pieces {
            let len = char_len(&piece);
            if total + len > self.chunk_size && !window.is_empty() {
                if total > self.chunk_size {
                    warn!(
                        size = total,
                        limit = self.chunk_size,
                        "created a chunk larger than the configured size"
                    );
                }
                chunks.extend(trimmed(window.iter().map(String::as_str).collect()));

                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match window.pop_front() {
                        Some(front) => total -= char_len(&front),
                        None => break,
                    }
                }
            }
            total += len;
            window.push_back(piece);
        }

        if !window.is_empty() {
            chunks.extend(trimmed(window.iter().map(String::as_str).collect()));
        }
        chunks
    }
}

/// Split on `separator`, attaching each separator to the start of the
/// piece that follows it. The empty separator yields single characters.
fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }

    let mut pieces = Vec::new();
    let mut rest = text;
    let mut prefix = "";
    while let Some(at) = rest.find(separator) {
        let piece = format!("{}{}", prefix, &rest[..at]);
        if !piece.is_empty() {
            pieces.push(piece);
        }
        prefix = separator;
        rest = &rest[at + separator.len()..];
    }
    let last = format!("{}{}", prefix, rest);
    if !last.is_empty() {
        pieces.push(last);
    }
    pieces
}

fn trimmed(chunk: String) -> Option<String> {
    let chunk = chunk.trim();
    (!chunk.is_empty()).then(|| chunk.to_string())
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_short_text_is_one_chunk() {
        let splitter = TextSplitter::default();
        assert_eq!(
            splitter.split("  Hà Nội là thủ đô của Việt Nam.  "),
            vec!["Hà Nội là thủ đô của Việt Nam.".to_string()]
        );
        assert!(splitter.split("   \n\n ").is_empty());
    }

    #[test]
    fn test_paragraphs_are_merged_up_to_chunk_size() {
        let splitter = TextSplitter::new(30, 0);
        let text = "Đoạn một ngắn.\n\nĐoạn hai ngắn.\n\nĐoạn ba dài hơn một chút nữa.";
        let chunks = splitter.split(text);

        assert_eq!(
            chunks,
            vec![
                "Đoạn một ngắn.\n\nĐoạn hai ngắn.".to_string(),
                "Đoạn ba dài hơn một chút nữa.".to_string(),
            ]
        );
        assert!(chunks.iter().all(|c| c.chars().count() <= 30));
    }

    #[test]
    fn test_long_paragraph_falls_back_to_words() {
        let splitter = TextSplitter::new(20, 0);
        let text = "một hai ba bốn năm sáu bảy tám chín mười mười một mười hai";
        let chunks = splitter.split(text);

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 20), "{chunks:?}");
        assert_eq!(chunks.join(" "), text);
    }

    #[test]
    fn test_overlap_repeats_trailing_words() {
        let splitter = TextSplitter::new(12, 6);
        let chunks = splitter.split("aaa bbb ccc ddd eee");

        assert_eq!(
            chunks,
            vec!["aaa bbb ccc".to_string(), "ccc ddd eee".to_string()]
        );
    }

    #[test]
    fn test_unbroken_text_splits_by_character() {
        let splitter = TextSplitter::new(4, 0);
        assert_eq!(
            splitter.split("abcdefghij"),
            vec!["abcd".to_string(), "efgh".to_string(), "ij".to_string()]
        );
    }

    #[test]
    fn test_split_keeping_separator() {
        assert_eq!(
            split_keeping_separator("a.b.c", "."),
            vec!["a".to_string(), ".b".to_string(), ".c".to_string()]
        );
        assert_eq!(split_keeping_separator("ab", ""), vec!["a", "b"]);
    }

    #[test]
    fn test_overlap_clamped_below_size() {
        let splitter = TextSplitter::new(10, 50);
        assert_eq!(splitter.chunk_overlap, 9);
    }
}
