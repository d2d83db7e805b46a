//! anamnesa-vector
//!
//! Dense vector index over chunk embeddings. Search is exact below a tunable
//! corpus size and goes through an HNSW graph (with exact re-scoring) above it.
pub mod index;

pub use index::{VectorArtifact, VectorError, VectorIndex};
