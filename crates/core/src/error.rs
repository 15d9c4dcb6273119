//! Error taxonomy shared by every knowledge-engine crate

use thiserror::Error;

/// Knowledge engine errors
///
/// Each variant maps to one failure class with its own retry policy:
/// configuration and dimension errors are caller bugs, embedding and vector
/// store errors are boundary failures that may be retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Chunking configuration error: {0}")]
    ChunkingConfig(String),

    #[error("Embedding service error: {0}")]
    EmbeddingService(String),

    #[error("Vector index error: {0}")]
    VectorIndex(String),

    #[error("Lexical index error: {0}")]
    LexicalIndex(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Whether a bounded retry may succeed
    ///
    /// Only calls that cross a service boundary are retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::EmbeddingService(_) | Error::VectorIndex(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
