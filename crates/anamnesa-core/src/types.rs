//! Domain types shared by the indexes, the engine and the facade.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

pub type ChunkId = String;
pub type DocumentId = String;

/// Where a document came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    CloudDrive,
    CrawledPaper,
}

impl SourceType {
    pub fn label(self) -> &'static str {
        match self {
            Self::CloudDrive => "Google Drive",
            Self::CrawledPaper => "NCBI",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub file_name: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl DocumentMetadata {
    /// Title if known, otherwise the file name.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().filter(|t| !t.trim().is_empty()).unwrap_or(&self.file_name)
    }
}

/// An immutable unit of ingested text.
///
/// `id` is a stable hash of the source key (relative path or URL), so the
/// same source always yields the same id across rebuilds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub source_type: SourceType,
    pub raw_text: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn new(source_key: &str, source_type: SourceType, raw_text: String, metadata: DocumentMetadata) -> Self {
        Self { id: document_id(source_key), source_type, raw_text, metadata }
    }

    pub fn content_hash(&self) -> String {
        blake3::hash(self.raw_text.as_bytes()).to_hex().to_string()
    }
}

/// Stable document id: the first 16 hex chars of blake3(source key).
pub fn document_id(source_key: &str) -> DocumentId {
    let hex = blake3::hash(source_key.as_bytes()).to_hex();
    hex[..16].to_string()
}

/// A bounded slice of a document's text; the atomic retrieval unit.
///
/// - `chunk_id`: `"{document_id}:{position:06}"`, so ids sort by position
/// - `token_count`: whitespace-delimited words in `text`
/// - `start_offset`/`end_offset`: byte range of `text` inside the document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub text: String,
    pub token_count: usize,
    pub position: usize,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// Chunk plus the owning document's provenance, as stored in a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkRecord {
    pub chunk: Chunk,
    pub source_type: SourceType,
    pub metadata: DocumentMetadata,
}

/// Indicates which index produced a hit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Vector,
    Keyword,
}

/// Raw per-index result. `score` is index-specific; higher is always better.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub id: ChunkId,
    pub score: f32,
    pub source: SourceKind,
    /// Normalized query terms found in the chunk. Keyword hits only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_terms: Vec<String>,
}

impl SearchHit {
    pub fn new(id: impl Into<ChunkId>, score: f32, source: SourceKind) -> Self {
        Self { id: id.into(), score, source, matched_terms: Vec::new() }
    }
}

/// Per-signal scores before fusion. Ranks are 1-based.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SourceScores {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_rank: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword_rank: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_terms: Vec<String>,
}

/// One fused, ranked result. Created per query and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    /// Fused score in [0, 1].
    pub score: f32,
    pub source_scores: SourceScores,
    pub content_preview: String,
    /// Full chunk text, used to assemble the context block.
    pub text: String,
    pub source_type: SourceType,
    pub metadata: DocumentMetadata,
}

/// Calling context; selects a fusion weighting profile.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalContext {
    Anamnesis,
    Diagnosis,
    #[default]
    General,
}

impl RetrievalContext {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anamnesis => "anamnesis",
            Self::Diagnosis => "diagnosis",
            Self::General => "general",
        }
    }
}

impl fmt::Display for RetrievalContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetrievalContext {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anamnesis" => Ok(Self::Anamnesis),
            "diagnosis" => Ok(Self::Diagnosis),
            "general" => Ok(Self::General),
            other => Err(Error::InvalidConfig(format!("unknown retrieval context '{other}'"))),
        }
    }
}

/// First `max_chars` characters of `text`, with `...` appended when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_id_is_stable_and_short() {
        let a = document_id("drive/anamnesis/demam.txt");
        assert_eq!(a.len(), 16);
        assert_eq!(a, document_id("drive/anamnesis/demam.txt"));
        assert_ne!(a, document_id("drive/anamnesis/batuk.txt"));
    }

    #[test]
    fn preview_respects_char_boundaries() {
        assert_eq!(preview("héllo", 10), "héllo");
        assert_eq!(preview("héllo wörld", 5), "héllo...");
        assert_eq!(preview("", 3), "");
    }

    #[test]
    fn context_parses_case_insensitively() {
        assert_eq!("Diagnosis".parse::<RetrievalContext>().ok(), Some(RetrievalContext::Diagnosis));
        assert!("triage".parse::<RetrievalContext>().is_err());
        assert_eq!(RetrievalContext::default(), RetrievalContext::General);
    }
}
