//! Text chunkers.
//!
//! A [`ChunkTransformer`] splits an object's text into ordered chunk
//! strings before embedding. Three strategies are provided:
//!
//! | Strategy | Unit | Boundaries |
//! |----------|------|------------|
//! | [`FixedSizeChunker`] | characters | fixed windows with overlap |
//! | [`SentenceChunker`] | characters or tokens | sentence boundaries (UAX #29) |
//! | [`ParagraphChunker`] | characters | blank-line paragraphs, min/max bounds |
//!
//! All sizes count Unicode scalar values, never bytes, so a chunk never
//! splits a multi-byte character.
//!
//! # Example
//!
//! ```rust
//! use vector_index_core::chunk::{ChunkTransformer, FixedSizeChunker};
//!
//! let chunker = FixedSizeChunker::new(4, 1).unwrap();
//! assert_eq!(chunker.transform("abcdefg"), vec!["abcd", "defg"]);
//! ```

use serde::Deserialize;
use unicode_segmentation::UnicodeSegmentation;

use crate::error::{IndexError, Result};

/// Approximate characters-per-token ratio used by [`SizeUnit::Tokens`].
const CHARS_PER_TOKEN: usize = 4;

/// Splits a string into an ordered list of chunk strings.
pub trait ChunkTransformer: Send + Sync {
    fn transform(&self, text: &str) -> Vec<String>;
}

// ============ Fixed size ============

/// Walks the text in windows of `chunk_size` characters, advancing by
/// `chunk_size - chunk_overlap` each step. The final partial window is
/// kept. Text no longer than `chunk_size` comes back unchanged as one chunk;
/// empty or whitespace-only text yields no chunks.
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl FixedSizeChunker {
    pub const DEFAULT_SIZE: usize = 1000;
    pub const DEFAULT_OVERLAP: usize = 100;

    /// Fails if `chunk_size` is zero or `chunk_overlap >= chunk_size`, since
    /// the window would never advance.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(IndexError::config("chunk_size must be greater than 0"));
        }
        if chunk_overlap >= chunk_size {
            return Err(IndexError::config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }
}

impl Default for FixedSizeChunker {
    fn default() -> Self {
        Self {
            chunk_size: Self::DEFAULT_SIZE,
            chunk_overlap: Self::DEFAULT_OVERLAP,
        }
    }
}

impl ChunkTransformer for FixedSizeChunker {
    fn transform(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        // Byte offset of every char, plus the end, so windows slice on
        // char boundaries.
        let mut offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        let char_len = offsets.len();
        offsets.push(text.len());

        if char_len <= self.chunk_size {
            return vec![text.to_string()];
        }

        let step = self.chunk_size.saturating_sub(self.chunk_overlap).max(1);
        let mut chunks = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + self.chunk_size).min(char_len);
            chunks.push(text[offsets[start]..offsets[end]].to_string());
            if end >= char_len {
                break;
            }
            start += step;
        }
        chunks
    }
}

// ============ Sentence aware ============

/// Unit in which [`SentenceChunker`] measures size and overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeUnit {
    Characters,
    Tokens,
}

impl SizeUnit {
    fn measure(self, s: &str) -> usize {
        let chars = s.chars().count();
        match self {
            SizeUnit::Characters => chars,
            SizeUnit::Tokens => chars.div_ceil(CHARS_PER_TOKEN),
        }
    }

    fn to_chars(self, n: usize) -> usize {
        match self {
            SizeUnit::Characters => n,
            SizeUnit::Tokens => n * CHARS_PER_TOKEN,
        }
    }
}

/// Packs whole sentences greedily up to `chunk_size`.
///
/// When a chunk is flushed, its trailing sentences totalling at most
/// `chunk_overlap` seed the next chunk. A single sentence longer than
/// `chunk_size` is hard-split at whitespace.
#[derive(Debug, Clone)]
pub struct SentenceChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    unit: SizeUnit,
}

impl SentenceChunker {
    pub const DEFAULT_SIZE: usize = 1024;
    pub const DEFAULT_OVERLAP: usize = 20;

    pub fn new(chunk_size: usize, chunk_overlap: usize, unit: SizeUnit) -> Result<Self> {
        if chunk_size == 0 {
            return Err(IndexError::config("chunk_size must be greater than 0"));
        }
        if chunk_overlap >= chunk_size {
            return Err(IndexError::config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            unit,
        })
    }
}

impl Default for SentenceChunker {
    fn default() -> Self {
        Self {
            chunk_size: Self::DEFAULT_SIZE,
            chunk_overlap: Self::DEFAULT_OVERLAP,
            unit: SizeUnit::Tokens,
        }
    }
}

impl ChunkTransformer for SentenceChunker {
    fn transform(&self, text: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_size = 0;

        let flush = |current: &Vec<&str>, chunks: &mut Vec<String>| {
            let joined = current.concat();
            let trimmed = joined.trim();
            if !trimmed.is_empty() {
                chunks.push(trimmed.to_string());
            }
        };

        for sentence in text.split_sentence_bounds() {
            if sentence.trim().is_empty() && current.is_empty() {
                continue;
            }
            let size = self.unit.measure(sentence);

            if size > self.chunk_size {
                if !current.is_empty() {
                    flush(&current, &mut chunks);
                    current.clear();
                    current_size = 0;
                }
                for piece in hard_split(sentence, self.unit.to_chars(self.chunk_size)) {
                    chunks.push(piece.to_string());
                }
                continue;
            }

            if current_size + size > self.chunk_size && !current.is_empty() {
                flush(&current, &mut chunks);

                // Carry trailing sentences forward as overlap, as long as
                // the next sentence still fits beside them.
                let mut carried = Vec::new();
                let mut carried_size = 0;
                for s in current.iter().rev() {
                    let s_size = self.unit.measure(s);
                    if carried_size + s_size > self.chunk_overlap
                        || carried_size + s_size + size > self.chunk_size
                    {
                        break;
                    }
                    carried.push(*s);
                    carried_size += s_size;
                }
                carried.reverse();
                current = carried;
                current_size = carried_size;
            }

            current.push(sentence);
            current_size += size;
        }

        if !current.is_empty() {
            flush(&current, &mut chunks);
        }
        chunks
    }
}

// ============ Paragraph aware ============

/// Splits on blank-line paragraphs and concatenates them greedily until
/// the next one would push the chunk past `max_chunk_size`.
///
/// A pending chunk shorter than `min_chunk_size` is folded into the
/// previous chunk, so merged chunks may exceed `max_chunk_size` by less
/// than `min_chunk_size + 2`. With no previous chunk it is emitted on its
/// own, which is how a short input becomes a single chunk. Text is never
/// dropped. Paragraphs longer than `max_chunk_size` are hard-split. Empty
/// or whitespace-only input yields no chunks.
#[derive(Debug, Clone)]
pub struct ParagraphChunker {
    min_chunk_size: usize,
    max_chunk_size: usize,
}

impl ParagraphChunker {
    pub const DEFAULT_MIN: usize = 100;
    pub const DEFAULT_MAX: usize = 1000;

    pub fn new(min_chunk_size: usize, max_chunk_size: usize) -> Result<Self> {
        if max_chunk_size == 0 {
            return Err(IndexError::config("max_chunk_size must be greater than 0"));
        }
        if min_chunk_size > max_chunk_size {
            return Err(IndexError::config(format!(
                "min_chunk_size ({}) must not exceed max_chunk_size ({})",
                min_chunk_size, max_chunk_size
            )));
        }
        Ok(Self {
            min_chunk_size,
            max_chunk_size,
        })
    }

    fn push_chunk(&self, chunks: &mut Vec<String>, chunk: String) {
        let len = chunk.chars().count();
        if len < self.min_chunk_size {
            if let Some(prev) = chunks.last_mut() {
                prev.push_str("\n\n");
                prev.push_str(&chunk);
                return;
            }
        }
        chunks.push(chunk);
    }
}

impl Default for ParagraphChunker {
    fn default() -> Self {
        Self {
            min_chunk_size: Self::DEFAULT_MIN,
            max_chunk_size: Self::DEFAULT_MAX,
        }
    }
}

impl ChunkTransformer for ParagraphChunker {
    fn transform(&self, text: &str) -> Vec<String> {
        let mut chunks: Vec<String> = Vec::new();
        let mut current = String::new();
        let mut current_len = 0;

        for para in text.split("\n\n") {
            let trimmed = para.trim();
            if trimmed.is_empty() {
                continue;
            }
            let para_len = trimmed.chars().count();

            if para_len > self.max_chunk_size {
                if !current.is_empty() {
                    self.push_chunk(&mut chunks, std::mem::take(&mut current));
                    current_len = 0;
                }
                for piece in hard_split(trimmed, self.max_chunk_size) {
                    chunks.push(piece.to_string());
                }
                continue;
            }

            if !current.is_empty() && current_len + 2 + para_len > self.max_chunk_size {
                self.push_chunk(&mut chunks, std::mem::take(&mut current));
                current_len = 0;
            }

            if !current.is_empty() {
                current.push_str("\n\n");
                current_len += 2;
            }
            current.push_str(trimmed);
            current_len += para_len;
        }

        if !current.is_empty() {
            self.push_chunk(&mut chunks, current);
        }
        chunks
    }
}

// ============ Configured selection ============

/// Strategy selection as it appears in configuration files.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum ChunkerConfig {
    Fixed {
        #[serde(default = "default_fixed_size")]
        chunk_size: usize,
        #[serde(default = "default_fixed_overlap")]
        chunk_overlap: usize,
    },
    Sentence {
        #[serde(default = "default_sentence_size")]
        chunk_size: usize,
        #[serde(default = "default_sentence_overlap")]
        chunk_overlap: usize,
        #[serde(default = "default_unit")]
        unit: SizeUnit,
    },
    Paragraph {
        #[serde(default = "default_min")]
        min_chunk_size: usize,
        #[serde(default = "default_max")]
        max_chunk_size: usize,
    },
}

fn default_fixed_size() -> usize {
    FixedSizeChunker::DEFAULT_SIZE
}
fn default_fixed_overlap() -> usize {
    FixedSizeChunker::DEFAULT_OVERLAP
}
fn default_sentence_size() -> usize {
    SentenceChunker::DEFAULT_SIZE
}
fn default_sentence_overlap() -> usize {
    SentenceChunker::DEFAULT_OVERLAP
}
fn default_unit() -> SizeUnit {
    SizeUnit::Tokens
}
fn default_min() -> usize {
    ParagraphChunker::DEFAULT_MIN
}
fn default_max() -> usize {
    ParagraphChunker::DEFAULT_MAX
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        ChunkerConfig::Fixed {
            chunk_size: default_fixed_size(),
            chunk_overlap: default_fixed_overlap(),
        }
    }
}

impl ChunkerConfig {
    /// Validate parameters and build the chunker.
    pub fn build(&self) -> Result<Box<dyn ChunkTransformer>> {
        Ok(match *self {
            ChunkerConfig::Fixed {
                chunk_size,
                chunk_overlap,
            } => Box::new(FixedSizeChunker::new(chunk_size, chunk_overlap)?),
            ChunkerConfig::Sentence {
                chunk_size,
                chunk_overlap,
                unit,
            } => Box::new(SentenceChunker::new(chunk_size, chunk_overlap, unit)?),
            ChunkerConfig::Paragraph {
                min_chunk_size,
                max_chunk_size,
            } => Box::new(ParagraphChunker::new(min_chunk_size, max_chunk_size)?),
        })
    }
}

// ============ Helpers ============

/// Byte offset of the `n`th char, or the string length if shorter.
fn char_offset(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}

/// Split `text` into trimmed pieces of at most `max_chars` characters,
/// preferring the last newline or space inside each window.
fn hard_split(text: &str, max_chars: usize) -> Vec<&str> {
    let max_chars = max_chars.max(1);
    let mut pieces = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        let window_end = char_offset(remaining, max_chars);
        let split_at = if window_end < remaining.len() {
            remaining[..window_end]
                .rfind('\n')
                .or_else(|| remaining[..window_end].rfind(' '))
                .map(|pos| pos + 1)
                .unwrap_or(window_end)
        } else {
            window_end
        };
        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            pieces.push(piece);
        }
        remaining = &remaining[split_at..];
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_short_text_single_chunk() {
        let chunker = FixedSizeChunker::new(10, 2).unwrap();
        assert_eq!(chunker.transform("short"), vec!["short"]);
    }

    #[test]
    fn test_blank_input_yields_no_chunks_for_every_strategy() {
        let chunkers: Vec<Box<dyn ChunkTransformer>> = vec![
            Box::new(FixedSizeChunker::new(10, 2).unwrap()),
            Box::new(SentenceChunker::default()),
            Box::new(ParagraphChunker::default()),
        ];
        for chunker in &chunkers {
            assert!(chunker.transform("").is_empty());
            assert!(chunker.transform(" \n\t\n\n ").is_empty());
        }
    }

    #[test]
    fn test_fixed_rejects_overlap_not_below_size() {
        assert!(matches!(
            FixedSizeChunker::new(10, 10),
            Err(IndexError::Config(_))
        ));
        assert!(FixedSizeChunker::new(10, 25).is_err());
        assert!(FixedSizeChunker::new(0, 0).is_err());
    }

    #[test]
    fn test_fixed_covers_input_with_overlap() {
        let text: String = (0..2500).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let chunker = FixedSizeChunker::new(1000, 100).unwrap();
        let chunks = chunker.transform(&text);
        assert_eq!(chunks.len(), 3);

        for c in &chunks[..chunks.len() - 1] {
            assert_eq!(c.chars().count(), 1000);
        }
        // consecutive chunks share exactly chunk_overlap characters
        for pair in chunks.windows(2) {
            let tail: String = pair[0].chars().skip(900).collect();
            let head: String = pair[1].chars().take(100).collect();
            assert_eq!(tail, head);
        }
        // stitching the non-overlapping parts reproduces the input
        let mut rebuilt = chunks[0].clone();
        for c in &chunks[1..] {
            rebuilt.extend(c.chars().skip(100));
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_fixed_multibyte() {
        let text = "┌──┐│héllo│└──┘";
        let chunker = FixedSizeChunker::new(4, 1).unwrap();
        let chunks = chunker.transform(text);
        for c in &chunks {
            assert!(c.chars().count() <= 4);
        }
        assert_eq!(chunks[0], "┌──┐");
        assert_eq!(chunks[1], "┐│hé");
    }

    #[test]
    fn test_sentence_packs_whole_sentences() {
        let text = "One two three. Four five six. Seven eight nine. Ten.";
        let chunker = SentenceChunker::new(32, 0, SizeUnit::Characters).unwrap();
        let chunks = chunker.transform(text);
        assert_eq!(
            chunks,
            vec!["One two three. Four five six.", "Seven eight nine. Ten."]
        );
    }

    #[test]
    fn test_sentence_overlap_carries_last_sentence() {
        let text = "Aaaa. Bbbb. Cccc. Dddd.";
        let chunker = SentenceChunker::new(12, 6, SizeUnit::Characters).unwrap();
        let chunks = chunker.transform(text);
        assert_eq!(chunks, vec!["Aaaa. Bbbb.", "Bbbb. Cccc.", "Cccc. Dddd."]);
    }

    #[test]
    fn test_sentence_oversized_sentence_hard_split() {
        let long = "word ".repeat(40);
        let chunker = SentenceChunker::new(5, 1, SizeUnit::Tokens).unwrap();
        let chunks = chunker.transform(&long);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= 20);
        }
    }

    #[test]
    fn test_sentence_empty_input() {
        let chunker = SentenceChunker::default();
        assert!(chunker.transform("").is_empty());
        assert!(chunker.transform("   \n ").is_empty());
    }

    #[test]
    fn test_paragraph_empty_input_yields_nothing() {
        let chunker = ParagraphChunker::default();
        assert!(chunker.transform("").is_empty());
        assert!(chunker.transform("  \n\n \n\n").is_empty());
    }

    #[test]
    fn test_paragraph_short_input_single_chunk() {
        let chunker = ParagraphChunker::new(100, 1000).unwrap();
        assert_eq!(chunker.transform("  tiny text  "), vec!["tiny text"]);
    }

    #[test]
    fn test_paragraph_greedy_concatenation() {
        let a = "a".repeat(40);
        let b = "b".repeat(40);
        let c = "c".repeat(40);
        let text = format!("{a}\n\n{b}\n\n{c}");
        let chunker = ParagraphChunker::new(10, 90).unwrap();
        let chunks = chunker.transform(&text);
        assert_eq!(chunks, vec![format!("{a}\n\n{b}"), c]);
    }

    #[test]
    fn test_paragraph_short_fragment_merged_not_dropped() {
        let a = "a".repeat(50);
        let b = "b".repeat(58);
        let text = format!("{a}\n\n{b}\n\nxy");
        let chunker = ParagraphChunker::new(10, 60).unwrap();
        let chunks = chunker.transform(&text);
        assert_eq!(chunks, vec![a, format!("{b}\n\nxy")]);
    }

    #[test]
    fn test_paragraph_oversized_paragraph_split() {
        let para = "lorem ipsum ".repeat(30);
        let chunker = ParagraphChunker::new(1, 50).unwrap();
        let chunks = chunker.transform(&para);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= 50);
        }
    }

    #[test]
    fn test_config_builds_and_validates() {
        let cfg: ChunkerConfig =
            serde_json::from_value(serde_json::json!({"strategy": "paragraph"})).unwrap();
        assert!(cfg.build().is_ok());

        let bad = ChunkerConfig::Fixed {
            chunk_size: 5,
            chunk_overlap: 5,
        };
        assert!(bad.build().is_err());
    }
}
