//! Document ingestion: fetch raw items from every source, extract their text
//! and turn them into immutable [`Document`]s.
//!
//! Failures are absorbed at the smallest possible unit: an unavailable source
//! is skipped, an item that fails extraction is skipped, and the batch goes on.

mod extract;
mod sources;

use std::collections::HashSet;
use std::sync::Arc;

pub use extract::DefaultExtractor;
pub use sources::{guess_mime_type, CrawlerExportSource, DirectorySource};

use crate::error::IngestionError;
use crate::traits::{DocumentSource, TextExtractor};
use crate::types::{Document, DocumentMetadata, SourceType};

/// Raw bytes plus provenance, as returned by a [`DocumentSource`].
#[derive(Debug, Clone)]
pub struct SourceItem {
    /// Stable key (relative path or URL) the document id is derived from.
    pub key: String,
    pub source_type: SourceType,
    pub bytes: Vec<u8>,
    pub metadata: DocumentMetadata,
}

/// Fetch and extract every source in order. Duplicate ids keep the first item.
pub async fn ingest(sources: &[Arc<dyn DocumentSource>], extractor: &dyn TextExtractor) -> Vec<Document> {
    let mut documents = Vec::new();
    let mut seen = HashSet::new();
    let mut skipped = 0usize;

    for source in sources {
        let items = match source.fetch().await {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(source = source.name(), error = %e, "document source unavailable, skipping");
                continue;
            }
        };
        tracing::info!(source = source.name(), items = items.len(), "fetched source items");

        for item in items {
            match extract_document(&item, extractor) {
                Ok(doc) => {
                    if seen.insert(doc.id.clone()) {
                        documents.push(doc);
                    } else {
                        tracing::debug!(key = %item.key, "duplicate document, keeping first occurrence");
                    }
                }
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(key = %item.key, error = %e, "skipping document");
                }
            }
        }
    }

    tracing::info!(documents = documents.len(), skipped, "ingestion finished");
    documents
}

fn extract_document(item: &SourceItem, extractor: &dyn TextExtractor) -> Result<Document, IngestionError> {
    let text = extractor.extract(item)?;
    if text.trim().is_empty() {
        return Err(IngestionError::Empty(item.metadata.file_name.clone()));
    }
    Ok(Document::new(&item.key, item.source_type, text, item.metadata.clone()))
}
