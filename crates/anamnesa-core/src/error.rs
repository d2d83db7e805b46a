//! Error taxonomy shared by every crate in the workspace.
//!
//! Ingestion errors are absorbed per document, embedding errors are retried,
//! index load errors trigger a rebuild, and retrieval errors never leave the
//! facade (they become a degraded response).
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation failed: {0}")]
    Operation(String),

    #[error(transparent)]
    Ingestion(#[from] IngestionError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingServiceError),

    #[error(transparent)]
    IndexLoad(#[from] IndexLoadError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A single document could not be turned into text.
#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported format for {name} ({mime_type})")]
    UnsupportedFormat { name: String, mime_type: String },

    #[error("text extraction failed for {name}: {reason}")]
    Extraction { name: String, reason: String },

    #[error("document {0} has no extractable text")]
    Empty(String),

    #[error("source {source_name} unavailable: {reason}")]
    Source { source_name: String, reason: String },
}

/// Failure talking to the embedding model.
#[derive(Debug, Error)]
pub enum EmbeddingServiceError {
    #[error("embedding provider not configured: {0}")]
    NotConfigured(String),

    #[error("embedding request failed: {0}")]
    Transport(String),

    #[error("embedding request timed out")]
    Timeout,

    #[error("embedding provider rate limited the request")]
    RateLimited,

    #[error("embedding API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding model error: {0}")]
    Model(String),
}

impl EmbeddingServiceError {
    /// Transient failures worth another attempt after a backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout | Self::RateLimited => true,
            Self::Api { status, .. } => *status >= 500,
            Self::NotConfigured(_)
            | Self::InvalidResponse(_)
            | Self::DimensionMismatch { .. }
            | Self::Model(_) => false,
        }
    }
}

/// A snapshot on disk is missing, corrupt or built from another corpus.
#[derive(Debug, Error)]
pub enum IndexLoadError {
    #[error("snapshot not found at {0}")]
    Missing(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest: {0}")]
    Manifest(String),

    #[error("unsupported snapshot format version {found} (expected {expected})")]
    FormatVersion { found: u32, expected: u32 },

    #[error("corpus version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: String, found: String },

    #[error("checksum mismatch for {artifact}")]
    Checksum { artifact: String },

    #[error("failed to decode {artifact}: {reason}")]
    Decode { artifact: String, reason: String },

    #[error("inconsistent snapshot: {0}")]
    Inconsistent(String),
}

/// Query-path failures. The facade converts all of them into a degraded response.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingServiceError),

    #[error("query timed out after {elapsed_ms} ms")]
    QueryTimeout { elapsed_ms: u64 },

    #[error("no documents indexed")]
    EmptyCorpus,

    #[error("search branch failed: {0}")]
    Branch(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

impl RetrievalError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Embedding(e) => e.is_retryable(),
            Self::Branch(_) => true,
            Self::QueryTimeout { .. } | Self::EmptyCorpus | Self::InvalidQuery(_) => false,
        }
    }

    /// Short machine-readable label surfaced in degraded responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Embedding(_) => "embedding_service",
            Self::QueryTimeout { .. } => "query_timeout",
            Self::EmptyCorpus => "empty_corpus",
            Self::Branch(_) => "branch_failure",
            Self::InvalidQuery(_) => "invalid_query",
        }
    }
}
