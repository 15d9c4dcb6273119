//! Sparse Search (BM25)
//!
//! Hand-built inverted index answering keyword queries for hybrid retrieval.
//!
//! Tokenization is deliberately simple: lowercase, non-word characters become
//! whitespace, split, and tokens shorter than `min_token_len` characters are
//! dropped. There is no stemming and no stopword list, so "dogs" does not
//! match "dog". That is a known recall limitation of this index.
//!
//! All bookkeeping for one knowledge base lives in a single [`RwLock`]:
//! writers (`add_documents`, `remove`, `clear`) take the write lock, searches
//! share the read lock, and a search never observes a half-applied write.

use knowledge_engine_config::constants::bm25;
use knowledge_engine_config::Bm25Config;
use knowledge_engine_core::{Chunk, Error, Result, ScoredChunk};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;

static NON_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w\s]").expect("valid non-word regex"));

/// Sparse search configuration
#[derive(Debug, Clone)]
pub struct SparseConfig {
    /// Term-frequency saturation
    pub k1: f32,
    /// Length normalization
    pub b: f32,
    /// Minimum token length in characters
    pub min_token_len: usize,
    /// Number of results when the caller does not say
    pub top_k: usize,
    /// Optional capacity limit (chunks)
    pub max_documents: Option<usize>,
}

impl Default for SparseConfig {
    fn default() -> Self {
        Self {
            k1: bm25::K1,
            b: bm25::B,
            min_token_len: bm25::MIN_TOKEN_LEN,
            top_k: bm25::DEFAULT_TOP_K,
            max_documents: None,
        }
    }
}

impl From<&Bm25Config> for SparseConfig {
    fn from(config: &Bm25Config) -> Self {
        Self {
            k1: config.k1,
            b: config.b,
            min_token_len: config.min_token_len,
            top_k: config.top_k,
            max_documents: config.max_documents,
        }
    }
}

/// Tokenize text the way the index does
pub fn tokenize(text: &str, min_token_len: usize) -> Vec<String> {
    let lowered = text.to_lowercase();
    NON_WORD
        .replace_all(&lowered, " ")
        .split_whitespace()
        .filter(|token| token.chars().count() >= min_token_len)
        .map(str::to_string)
        .collect()
}

/// A chunk with its precomputed term statistics
#[derive(Debug, Clone)]
struct IndexedChunk {
    chunk: Chunk,
    term_freqs: HashMap<String, u32>,
    /// Token count |d|
    length: usize,
}

impl IndexedChunk {
    fn new(chunk: Chunk, min_token_len: usize) -> Self {
        let tokens = tokenize(&chunk.content, min_token_len);
        let length = tokens.len();
        let mut term_freqs = HashMap::new();
        for token in tokens {
            *term_freqs.entry(token).or_insert(0) += 1;
        }
        Self {
            chunk,
            term_freqs,
            length,
        }
    }
}

/// Per-knowledge-base BM25 bookkeeping
#[derive(Debug, Default)]
struct Bm25State {
    /// Insertion order; search ties resolve by position here
    docs: Vec<IndexedChunk>,
    /// Chunk id -> position in `docs`
    positions: HashMap<String, usize>,
    /// Term -> number of chunks containing it at least once
    doc_freq: HashMap<String, usize>,
    total_length: usize,
    avg_length: f32,
}

impl Bm25State {
    fn insert(&mut self, doc: IndexedChunk) {
        if let Some(&pos) = self.positions.get(&doc.chunk.id) {
            self.forget_stats(pos);
            self.record_stats(&doc);
            self.docs[pos] = doc;
        } else {
            self.record_stats(&doc);
            self.positions.insert(doc.chunk.id.clone(), self.docs.len());
            self.docs.push(doc);
        }
    }

    fn record_stats(&mut self, doc: &IndexedChunk) {
        for term in doc.term_freqs.keys() {
            *self.doc_freq.entry(term.clone()).or_insert(0) += 1;
        }
        self.total_length += doc.length;
    }

    fn forget_stats(&mut self, pos: usize) {
        let doc = &self.docs[pos];
        for term in doc.term_freqs.keys() {
            if let Some(df) = self.doc_freq.get_mut(term) {
                *df -= 1;
                if *df == 0 {
                    self.doc_freq.remove(term);
                }
            }
        }
        self.total_length -= doc.length;
    }

    fn rebuild_positions(&mut self) {
        self.positions = self
            .docs
            .iter()
            .enumerate()
            .map(|(pos, doc)| (doc.chunk.id.clone(), pos))
            .collect();
    }

    fn refresh_average(&mut self) {
        self.avg_length = if self.docs.is_empty() {
            0.0
        } else {
            self.total_length as f32 / self.docs.len() as f32
        };
    }
}

/// BM25 index over chunk text
pub struct SparseIndex {
    state: RwLock<Bm25State>,
    config: SparseConfig,
}

impl SparseIndex {
    pub fn new(config: SparseConfig) -> Self {
        Self {
            state: RwLock::new(Bm25State::default()),
            config,
        }
    }

    pub fn config(&self) -> &SparseConfig {
        &self.config
    }

    /// Index chunks, replacing any chunk whose id is already present
    ///
    /// The capacity check runs before any bookkeeping changes, so a rejected
    /// batch leaves the index exactly as it was.
    pub fn add_documents(&self, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        // Tokenize outside the lock
        let docs: Vec<IndexedChunk> = chunks
            .iter()
            .cloned()
            .map(|chunk| IndexedChunk::new(chunk, self.config.min_token_len))
            .collect();

        let mut state = self.state.write();

        if let Some(max) = self.config.max_documents {
            let mut fresh: Vec<&str> = docs
                .iter()
                .map(|d| d.chunk.id.as_str())
                .filter(|id| !state.positions.contains_key(*id))
                .collect();
            fresh.sort_unstable();
            fresh.dedup();
            if state.docs.len() + fresh.len() > max {
                return Err(Error::LexicalIndex(format!(
                    "capacity exceeded: {} indexed + {} new > {}",
                    state.docs.len(),
                    fresh.len(),
                    max
                )));
            }
        }

        for doc in docs {
            state.insert(doc);
        }
        state.refresh_average();

        tracing::debug!(
            added = chunks.len(),
            total = state.docs.len(),
            avg_length = state.avg_length,
            "Lexical index updated"
        );
        Ok(())
    }

    /// Remove chunks by id, returning how many were present
    pub fn remove(&self, ids: &[String]) -> usize {
        let mut state = self.state.write();

        let mut doomed: Vec<usize> = ids
            .iter()
            .filter_map(|id| state.positions.get(id).copied())
            .collect();
        if doomed.is_empty() {
            return 0;
        }
        doomed.sort_unstable();
        doomed.dedup();

        for &pos in &doomed {
            state.forget_stats(pos);
        }
        // Highest position first so earlier indices stay valid
        for &pos in doomed.iter().rev() {
            state.docs.remove(pos);
        }
        state.rebuild_positions();
        state.refresh_average();

        doomed.len()
    }

    /// Score every chunk against `query`
    ///
    /// Only strictly positive scores are returned, best first. Equal scores
    /// keep insertion order. A query with no usable tokens returns nothing.
    pub fn search(&self, query: &str, top_k: Option<usize>) -> Vec<ScoredChunk> {
        let top_k = top_k.unwrap_or(self.config.top_k);
        let terms = tokenize(query, self.config.min_token_len);
        if terms.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let state = self.state.read();
        if state.docs.is_empty() {
            return Vec::new();
        }

        let n = state.docs.len() as f32;
        let idf: Vec<Option<f32>> = terms
            .iter()
            .map(|term| {
                state.doc_freq.get(term).map(|&df| {
                    let df = df as f32;
                    ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
                })
            })
            .collect();

        let (k1, b) = (self.config.k1, self.config.b);
        let avg_length = state.avg_length.max(f32::EPSILON);

        let mut scored: Vec<(usize, f32)> = state
            .docs
            .iter()
            .enumerate()
            .filter_map(|(pos, doc)| {
                let norm = k1 * (1.0 - b + b * doc.length as f32 / avg_length);
                let score: f32 = terms
                    .iter()
                    .zip(&idf)
                    .filter_map(|(term, idf)| {
                        let idf = (*idf)?;
                        let tf = *doc.term_freqs.get(term)? as f32;
                        Some(idf * (tf * (k1 + 1.0)) / (tf + norm))
                    })
                    .sum();
                (score > 0.0).then_some((pos, score))
            })
            .collect();

        // Stable: ties keep insertion order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k);

        scored
            .into_iter()
            .map(|(pos, score)| ScoredChunk {
                chunk: state.docs[pos].chunk.clone(),
                score,
            })
            .collect()
    }

    /// Reset all bookkeeping; safe to call repeatedly
    pub fn clear(&self) {
        *self.state.write() = Bm25State::default();
    }

    pub fn len(&self) -> usize {
        self.state.read().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.read().positions.contains_key(id)
    }

    /// Running average chunk length in tokens
    pub fn avg_doc_len(&self) -> f32 {
        self.state.read().avg_length
    }

    /// Number of chunks containing `term`
    pub fn doc_freq(&self, term: &str) -> usize {
        self.state.read().doc_freq.get(term).copied().unwrap_or(0)
    }
}

impl Default for SparseIndex {
    fn default() -> Self {
        Self::new(SparseConfig::default())
    }
}
