use async_trait::async_trait;

use crate::error::{EmbeddingServiceError, IngestionError, RetrievalError};
use crate::ingest::SourceItem;
use crate::types::{RetrievalContext, SearchResult};

/// Produces fixed-dimension dense vectors for text.
///
/// Implementations must return vectors of length `dim()` and keep the
/// output stable for a given `id()`; the id is part of the corpus version.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Stable identifier for the provider/model (e.g. `hashing:xxh64:d512`).
    fn id(&self) -> &str;
    fn dim(&self) -> usize;
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingServiceError>;
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingServiceError>;
}

/// An external collection of raw documents (cloud drive, literature crawler).
#[async_trait]
pub trait DocumentSource: Send + Sync {
    fn name(&self) -> &str;
    /// Fetch every available item. Partial availability is reported per item.
    async fn fetch(&self) -> Result<Vec<SourceItem>, IngestionError>;
}

/// Turns raw bytes into plain text.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, item: &SourceItem) -> Result<String, IngestionError>;
}

/// Query surface consumed by the retrieval facade.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    async fn query(&self, text: &str, k: usize, context: RetrievalContext) -> Result<Vec<SearchResult>, RetrievalError>;
    /// Number of chunks in the active index.
    fn chunk_count(&self) -> usize;
}
