//! Collaborator traits
//!
//! The engine consumes three external collaborators through these seams:
//! - `Embedder`: text to dense vectors
//! - `VectorIndex`: per-knowledge-base vector storage and similarity search
//! - `DocumentParser`: raw bytes to text plus metadata

mod embedder;
mod parser;
mod vector_index;

pub use embedder::Embedder;
pub use parser::DocumentParser;
pub use vector_index::{VectorIndex, VectorIndexFactory};
