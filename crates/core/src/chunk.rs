//! Chunk data model
//!
//! A chunk is the atomic unit of retrieval. Its metadata is a fixed set of
//! provenance fields plus an open extension map restricted to string, number
//! and boolean values, so ranking and display code never deals with an
//! untyped bag.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single extension metadata value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(f64),
    String(String),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{}", b),
            MetadataValue::Number(n) => write!(f, "{}", n),
            MetadataValue::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::String(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Number(value)
    }
}

impl From<usize> for MetadataValue {
    fn from(value: usize) -> Self {
        MetadataValue::Number(value as f64)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

/// Caller-supplied document metadata (filename, upload time, ...)
pub type MetadataMap = BTreeMap<String, MetadataValue>;

/// Provenance metadata attached to every chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    /// Originating document name/identifier
    pub source: String,
    /// 0-based position among chunks of the same source
    pub chunk_index: usize,
    /// Number of chunks produced from the source
    pub total_chunks: usize,
    /// Start offset (in characters) into the source text
    pub start_char: usize,
    /// End offset (exclusive, in characters) into the source text
    pub end_char: usize,
    pub word_count: usize,
    /// Document-level metadata copied onto each chunk
    #[serde(flatten)]
    pub extra: MetadataMap,
}

impl ChunkMetadata {
    /// Look up a field by name, covering both the fixed fields and `extra`
    pub fn get(&self, key: &str) -> Option<MetadataValue> {
        match key {
            "source" => Some(MetadataValue::from(self.source.as_str())),
            "chunkIndex" | "chunk_index" => Some(self.chunk_index.into()),
            "totalChunks" | "total_chunks" => Some(self.total_chunks.into()),
            "startChar" | "start_char" => Some(self.start_char.into()),
            "endChar" | "end_char" => Some(self.end_char.into()),
            "wordCount" | "word_count" => Some(self.word_count.into()),
            _ => self.extra.get(key).cloned(),
        }
    }
}

/// A retrievable passage of text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique within its knowledge base
    pub id: String,
    pub content: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn source(&self) -> &str {
        &self.metadata.source
    }
}

/// A chunk with a single-signal relevance score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Equality filter over chunk metadata; every condition must match
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    conditions: BTreeMap<String, MetadataValue>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.conditions.insert(key.into(), value.into());
        self
    }

    /// Filter selecting every chunk of one source document
    pub fn source(source: impl Into<String>) -> Self {
        Self::new().eq("source", source.into())
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn conditions(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
        self.conditions.iter()
    }

    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        self.conditions
            .iter()
            .all(|(key, expected)| metadata.get(key).as_ref() == Some(expected))
    }
}

/// Output of the document parsing collaborator
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDocument {
    pub content: String,
    pub metadata: MetadataMap,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> ChunkMetadata {
        let mut extra = MetadataMap::new();
        extra.insert("filename".to_string(), "cats.txt".into());
        extra.insert("pinned".to_string(), true.into());
        ChunkMetadata {
            source: "cats.txt".to_string(),
            chunk_index: 2,
            total_chunks: 5,
            start_char: 100,
            end_char: 180,
            word_count: 14,
            extra,
        }
    }

    #[test]
    fn test_get_fixed_and_extra_fields() {
        let meta = metadata();
        assert_eq!(meta.get("source"), Some(MetadataValue::from("cats.txt")));
        assert_eq!(meta.get("chunkIndex"), Some(MetadataValue::Number(2.0)));
        assert_eq!(meta.get("total_chunks"), Some(MetadataValue::Number(5.0)));
        assert_eq!(meta.get("pinned"), Some(MetadataValue::Bool(true)));
        assert_eq!(meta.get("missing"), None);
    }

    #[test]
    fn test_filter_matches_all_conditions() {
        let meta = metadata();
        assert!(MetadataFilter::source("cats.txt").matches(&meta));
        assert!(MetadataFilter::new()
            .eq("source", "cats.txt")
            .eq("chunkIndex", 2usize)
            .matches(&meta));
        assert!(!MetadataFilter::new()
            .eq("source", "cats.txt")
            .eq("pinned", false)
            .matches(&meta));
        assert!(MetadataFilter::new().matches(&meta));
    }

    #[test]
    fn test_metadata_serializes_camel_case_and_flattens_extra() {
        let json = serde_json::to_value(metadata()).unwrap();
        assert_eq!(json["chunkIndex"], 2);
        assert_eq!(json["totalChunks"], 5);
        assert_eq!(json["filename"], "cats.txt");

        let back: ChunkMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(back, metadata());
    }
}
