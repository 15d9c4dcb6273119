//! Text Chunking
//!
//! Splits parsed document text into overlapping passages for indexing.
//!
//! # Strategies
//!
//! 1. **Fixed**: sliding character window advancing by `chunk_size - chunk_overlap`
//! 2. **Sentence**: greedy sentence packing, seeding each chunk with the
//!    previous chunk's last one or two sentences
//! 3. **Paragraph**: greedy packing of whole paragraphs, no overlap
//!
//! Overlap is character-exact only for the fixed strategy. Sentence overlap
//! follows sentence boundaries and paragraph chunks do not overlap at all.
//!
//! All offsets are character (not byte) offsets into the source text.
//!
//! # Usage
//!
//! ```ignore
//! use knowledge_engine_rag::chunker::{ChunkOptions, Chunker};
//!
//! let chunker = Chunker::new(ChunkOptions::default())?;
//! let chunks = chunker.chunk("Long document text...", "notes.txt", &MetadataMap::new());
//! ```

use knowledge_engine_config::constants::chunking;
use knowledge_engine_config::ChunkingConfig;
use knowledge_engine_core::{Chunk, ChunkMetadata, Error, MetadataMap, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use unicode_segmentation::UnicodeSegmentation;

/// A sentence: text up to and including a run of `.`, `!` or `?`
static SENTENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^.!?]+(?:[.!?]+|$)").expect("valid sentence regex"));

/// A blank line, possibly containing spaces, plus any further blank lines
static PARAGRAPH_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n[ \t\r]*\n\s*").expect("valid paragraph regex"));

/// Chunking strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    /// Fixed character window with exact overlap
    Fixed,
    /// Split on sentence boundaries with approximate overlap
    Sentence,
    /// Split on blank lines, never inside a paragraph
    #[default]
    Paragraph,
}

impl FromStr for ChunkStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "sentence" => Ok(Self::Sentence),
            "paragraph" => Ok(Self::Paragraph),
            other => Err(Error::ChunkingConfig(format!(
                "unknown strategy '{}', expected one of {:?}",
                other,
                chunking::STRATEGIES
            ))),
        }
    }
}

/// Chunking options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkOptions {
    /// Target maximum characters per chunk
    pub chunk_size: usize,
    /// Characters of overlap carried into the next chunk
    pub chunk_overlap: usize,
    pub strategy: ChunkStrategy,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            chunk_size: chunking::CHUNK_SIZE,
            chunk_overlap: chunking::CHUNK_OVERLAP,
            strategy: ChunkStrategy::default(),
        }
    }
}

impl ChunkOptions {
    /// Reject configurations that cannot make progress
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::ChunkingConfig(
                "chunk_size must be greater than 0".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::ChunkingConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

impl TryFrom<&ChunkingConfig> for ChunkOptions {
    type Error = Error;

    fn try_from(config: &ChunkingConfig) -> Result<Self> {
        let options = Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            strategy: config.strategy.parse()?,
        };
        options.validate()?;
        Ok(options)
    }
}

/// Character-offset view over the source text
struct SourceText<'a> {
    text: &'a str,
    /// Byte offset of every char, plus `text.len()` as a sentinel
    byte_offsets: Vec<usize>,
}

impl<'a> SourceText<'a> {
    fn new(text: &'a str) -> Self {
        let mut byte_offsets: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
        byte_offsets.push(text.len());
        Self { text, byte_offsets }
    }

    fn len_chars(&self) -> usize {
        self.byte_offsets.len() - 1
    }

    fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.text[self.byte_offsets[start]..self.byte_offsets[end]]
    }

    /// Char position of a byte offset that lies on a char boundary
    fn char_pos(&self, byte: usize) -> usize {
        self.byte_offsets
            .binary_search(&byte)
            .unwrap_or_else(|insert_at| insert_at)
    }

    /// Trimmed char span of a byte range, `None` if only whitespace
    fn trimmed_span(&self, byte_start: usize, byte_end: usize) -> Option<Span> {
        let raw = &self.text[byte_start..byte_end];
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let lead = raw.len() - raw.trim_start().len();
        let start = byte_start + lead;
        let end = start + trimmed.len();
        Some(Span {
            start: self.char_pos(start),
            end: self.char_pos(end),
        })
    }
}

/// Half-open character span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

/// Text chunker
#[derive(Debug, Clone)]
pub struct Chunker {
    options: ChunkOptions,
}

impl Chunker {
    /// Create a chunker, rejecting invalid options before any chunking
    pub fn new(options: ChunkOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { options })
    }

    pub fn options(&self) -> &ChunkOptions {
        &self.options
    }

    /// Chunk a document
    ///
    /// Empty or whitespace-only text yields no chunks. `metadata` is copied
    /// into every chunk's extension map.
    pub fn chunk(&self, text: &str, source: &str, metadata: &MetadataMap) -> Vec<Chunk> {
        let src = SourceText::new(text);
        if text.trim().is_empty() {
            return Vec::new();
        }

        let spans = match self.options.strategy {
            ChunkStrategy::Fixed => self.fixed_spans(&src),
            ChunkStrategy::Sentence => self.sentence_spans(&src),
            ChunkStrategy::Paragraph => self.paragraph_spans(&src),
        };

        let spans: Vec<Span> = spans
            .into_iter()
            .filter(|span| !src.slice(span.start, span.end).trim().is_empty())
            .collect();
        let total_chunks = spans.len();

        spans
            .into_iter()
            .enumerate()
            .map(|(index, span)| {
                let content = src.slice(span.start, span.end).to_string();
                Chunk {
                    id: format!("{}#{}", source, index),
                    metadata: ChunkMetadata {
                        source: source.to_string(),
                        chunk_index: index,
                        total_chunks,
                        start_char: span.start,
                        end_char: span.end,
                        word_count: content.unicode_words().count(),
                        extra: metadata.clone(),
                    },
                    content,
                }
            })
            .collect()
    }

    /// Sliding window over characters
    fn fixed_spans(&self, src: &SourceText<'_>) -> Vec<Span> {
        let len = src.len_chars();
        let size = self.options.chunk_size;
        let overlap = self.options.chunk_overlap;
        let step = size - overlap;

        let mut spans = Vec::new();
        let mut start = 0;
        while start < len {
            let end = (start + size).min(len);
            spans.push(Span { start, end });

            start += step;
            // The rest would only repeat the overlap
            if start >= len.saturating_sub(overlap) {
                break;
            }
        }
        spans
    }

    /// Greedy sentence packing with a one or two sentence seed
    fn sentence_spans(&self, src: &SourceText<'_>) -> Vec<Span> {
        let sentences: Vec<Span> = SENTENCE
            .find_iter(src.text)
            .filter_map(|m| src.trimmed_span(m.start(), m.end()))
            .collect();

        let size = self.options.chunk_size;
        let width = |group: &[Span], next: Span| next.end - group[0].start;

        let mut spans = Vec::new();
        let mut current: Vec<Span> = Vec::new();

        for sentence in sentences {
            if !current.is_empty() && width(&current, sentence) > size {
                spans.push(Span {
                    start: current[0].start,
                    end: current[current.len() - 1].end,
                });

                current = self.sentence_seed(&current);
                if !current.is_empty() && width(&current, sentence) > size {
                    current.clear();
                }
            }
            current.push(sentence);
        }

        if let (Some(first), Some(last)) = (current.first(), current.last()) {
            spans.push(Span {
                start: first.start,
                end: last.end,
            });
        }
        spans
    }

    /// Trailing sentences of a closed chunk that fit in the overlap budget
    ///
    /// Never the whole chunk, so every chunk starts past the previous start.
    fn sentence_seed(&self, closed: &[Span]) -> Vec<Span> {
        let overlap = self.options.chunk_overlap;
        let n = closed.len();
        let last = closed[n - 1];

        if n >= 3 && last.end - closed[n - 2].start <= overlap {
            return closed[n - 2..].to_vec();
        }
        if n >= 2 && last.end - last.start <= overlap {
            return vec![last];
        }
        Vec::new()
    }

    /// Greedy paragraph packing
    fn paragraph_spans(&self, src: &SourceText<'_>) -> Vec<Span> {
        let mut paragraphs = Vec::new();
        let mut cursor = 0;
        for brk in PARAGRAPH_BREAK.find_iter(src.text) {
            if let Some(span) = src.trimmed_span(cursor, brk.start()) {
                paragraphs.push(span);
            }
            cursor = brk.end();
        }
        if let Some(span) = src.trimmed_span(cursor, src.text.len()) {
            paragraphs.push(span);
        }

        let size = self.options.chunk_size;
        let mut spans = Vec::new();
        let mut current: Option<Span> = None;

        for para in paragraphs {
            current = match current {
                Some(open) if para.end - open.start > size => {
                    spans.push(open);
                    Some(para)
                },
                Some(open) => Some(Span {
                    start: open.start,
                    end: para.end,
                }),
                None => Some(para),
            };
        }
        spans.extend(current);
        spans
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knowledge_engine_core::MetadataValue;

    fn chunker(chunk_size: usize, chunk_overlap: usize, strategy: ChunkStrategy) -> Chunker {
        Chunker::new(ChunkOptions {
            chunk_size,
            chunk_overlap,
            strategy,
        })
        .unwrap()
    }

    fn assert_well_formed(chunks: &[Chunk], overlap: usize) {
        for (i, chunk) in chunks.iter().enumerate() {
            assert!(chunk.metadata.start_char < chunk.metadata.end_char);
            assert_eq!(chunk.metadata.chunk_index, i);
            assert_eq!(chunk.metadata.total_chunks, chunks.len());
        }
        for pair in chunks.windows(2) {
            let (prev, next) = (&pair[0].metadata, &pair[1].metadata);
            assert!(prev.start_char <= next.start_char);
            assert!(prev.end_char.saturating_sub(next.start_char) <= overlap);
        }
    }

    #[test]
    fn test_fixed_window_overlap() {
        let text = "abcdefghij".repeat(250);
        let chunks = chunker(1000, 200, ChunkStrategy::Fixed).chunk(&text, "doc", &MetadataMap::new());

        let starts: Vec<usize> = chunks.iter().map(|c| c.metadata.start_char).collect();
        assert_eq!(starts, vec![0, 800, 1600]);
        assert_eq!(chunks[2].metadata.end_char, 2500);
        assert_eq!(
            &chunks[0].content[800..],
            &chunks[1].content[..200],
            "fixed overlap is character-exact"
        );
        assert_well_formed(&chunks, 200);
    }

    #[test]
    fn test_every_strategy_terminates_for_many_configurations() {
        let text = "The quick brown fox jumps over the lazy dog. It naps!\n\n".repeat(40);
        let text = text.trim_end();
        let len = text.chars().count();

        for strategy in [
            ChunkStrategy::Fixed,
            ChunkStrategy::Sentence,
            ChunkStrategy::Paragraph,
        ] {
            for size in [1usize, 2, 7, 50, 333, 1000, 5000] {
                for overlap in [0, 1, size / 2, size.saturating_sub(1)] {
                    if overlap >= size {
                        continue;
                    }
                    let chunks =
                        chunker(size, overlap, strategy).chunk(text, "fox", &MetadataMap::new());
                    assert!(!chunks.is_empty(), "{:?} {}/{}", strategy, size, overlap);
                    assert_well_formed(&chunks, overlap);
                    assert_eq!(
                        chunks.last().unwrap().metadata.end_char,
                        len,
                        "{:?} {}/{}",
                        strategy,
                        size,
                        overlap
                    );
                }
            }
        }
    }

    #[test]
    fn test_fixed_uses_char_offsets() {
        let chunks = chunker(5, 1, ChunkStrategy::Fixed).chunk("héllo wörld", "u", &MetadataMap::new());
        let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["héllo", "o wör", "rld"]);
        assert_eq!(chunks[2].metadata.start_char, 8);
        assert_eq!(chunks[2].metadata.end_char, 11);
    }

    #[test]
    fn test_invalid_options_rejected() {
        let err = Chunker::new(ChunkOptions {
            chunk_size: 100,
            chunk_overlap: 100,
            strategy: ChunkStrategy::Fixed,
        })
        .unwrap_err();
        assert!(matches!(err, Error::ChunkingConfig(_)));

        let err = Chunker::new(ChunkOptions {
            chunk_size: 0,
            chunk_overlap: 0,
            strategy: ChunkStrategy::Sentence,
        })
        .unwrap_err();
        assert!(matches!(err, Error::ChunkingConfig(_)));

        assert!(matches!(
            "semantic".parse::<ChunkStrategy>(),
            Err(Error::ChunkingConfig(_))
        ));
        assert_eq!("Sentence".parse::<ChunkStrategy>().unwrap(), ChunkStrategy::Sentence);
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        for strategy in [ChunkStrategy::Fixed, ChunkStrategy::Sentence, ChunkStrategy::Paragraph] {
            let c = chunker(100, 10, strategy);
            assert!(c.chunk("", "empty", &MetadataMap::new()).is_empty());
            assert!(c.chunk("  \n\n \t", "blank", &MetadataMap::new()).is_empty());
        }
    }

    #[test]
    fn test_sentence_chunks_seed_previous_sentence() {
        let text = "One is here. Two is here. Three is here. Four is here.";
        let chunks = chunker(30, 15, ChunkStrategy::Sentence).chunk(text, "s", &MetadataMap::new());

        let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(
            contents,
            vec![
                "One is here. Two is here.",
                "Two is here. Three is here.",
                "Three is here. Four is here.",
            ]
        );
        assert_well_formed(&chunks, 15);
    }

    #[test]
    fn test_sentence_without_overlap_budget_has_no_seed() {
        let text = "One is here. Two is here. Three is here.";
        let chunks = chunker(30, 0, ChunkStrategy::Sentence).chunk(text, "s", &MetadataMap::new());
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].metadata.end_char <= chunks[1].metadata.start_char);
    }

    #[test]
    fn test_oversized_sentence_is_kept_whole() {
        let long = format!("{}.", "word ".repeat(50).trim_end());
        let text = format!("Short one. {} Short two.", long);
        let chunks = chunker(40, 5, ChunkStrategy::Sentence).chunk(&text, "s", &MetadataMap::new());
        assert!(chunks.iter().any(|c| c.content == long));
        assert_well_formed(&chunks, 5);
    }

    #[test]
    fn test_paragraph_chunks_never_overlap() {
        let text = "Para one.\n\nPara two.\n\n\nPara three.";
        let chunks = chunker(25, 10, ChunkStrategy::Paragraph).chunk(text, "p", &MetadataMap::new());

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "Para one.\n\nPara two.");
        assert_eq!(chunks[1].content, "Para three.");
        assert_eq!(chunks[1].metadata.start_char, 23);
        assert_eq!(chunks[1].metadata.end_char, 34);
        // Overlap budget is ignored at paragraph boundaries
        assert!(chunks[0].metadata.end_char <= chunks[1].metadata.start_char);
        assert_well_formed(&chunks, 0);
    }

    #[test]
    fn test_metadata_and_ids() {
        let mut doc_meta = MetadataMap::new();
        doc_meta.insert("filename".to_string(), "cats.txt".into());

        let chunks = chunker(1000, 200, ChunkStrategy::Paragraph).chunk(
            "Cats are great pets.\n\nThey purr.",
            "cats.txt",
            &doc_meta,
        );
        assert_eq!(chunks.len(), 1);
        let chunk = &chunks[0];
        assert_eq!(chunk.id, "cats.txt#0");
        assert_eq!(chunk.source(), "cats.txt");
        assert_eq!(chunk.metadata.word_count, 6);
        assert_eq!(
            chunk.metadata.extra.get("filename"),
            Some(&MetadataValue::from("cats.txt"))
        );
    }

    #[test]
    fn test_options_from_config() {
        let config = ChunkingConfig {
            chunk_size: 500,
            chunk_overlap: 50,
            strategy: "fixed".to_string(),
        };
        let options = ChunkOptions::try_from(&config).unwrap();
        assert_eq!(options.strategy, ChunkStrategy::Fixed);

        let bad = ChunkingConfig {
            chunk_overlap: 600,
            ..config
        };
        assert!(ChunkOptions::try_from(&bad).is_err());
    }
}
