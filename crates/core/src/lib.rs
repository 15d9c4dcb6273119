//! Core types and traits for the knowledge engine
//!
//! This crate provides the types shared by every other crate:
//! - Chunk data model and metadata filters
//! - Error taxonomy
//! - Collaborator traits (embedder, vector index, document parser)

pub mod chunk;
pub mod error;
pub mod traits;

pub use chunk::{
    Chunk, ChunkMetadata, MetadataFilter, MetadataMap, MetadataValue, ParsedDocument, ScoredChunk,
};
pub use error::{Error, Result};
pub use traits::{DocumentParser, Embedder, VectorIndex, VectorIndexFactory};
