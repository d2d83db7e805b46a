//! anamnesa-text
//!
//! BM25 keyword index over chunk text. Tokenization runs through a tantivy
//! `TextAnalyzer` pipeline shared by index build and query time; see
//! `analyzer` and `bm25`.
pub mod analyzer;
pub mod bm25;

pub use analyzer::Analyzer;
pub use bm25::{KeywordArtifact, KeywordIndex};
