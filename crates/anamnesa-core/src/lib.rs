//! Shared building blocks for the anamnesa retrieval engine: domain types,
//! the error taxonomy, configuration, document ingestion and chunking.

pub mod chunking;
pub mod config;
pub mod error;
pub mod ingest;
pub mod retry;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
