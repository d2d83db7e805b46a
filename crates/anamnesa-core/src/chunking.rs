//! Word-window chunking with a fixed overlap.
//!
//! A token is a whitespace-delimited word. Windows hold at most
//! `max_tokens` words and advance by `max_tokens - overlap_tokens`. Each chunk
//! keeps its byte range in the source text so the document can be rebuilt.

use crate::config::ChunkingConfig;
use crate::error::{Error, Result};
use crate::types::{Chunk, Document};

pub fn chunk_id(document_id: &str, position: usize) -> String {
    format!("{document_id}:{position:06}")
}

/// Split `document` into overlapping windows.
pub fn chunk(document: &Document, config: &ChunkingConfig) -> Result<Vec<Chunk>> {
    config.validate()?;
    let text = document.raw_text.as_str();
    let word_starts = word_starts(text);
    let n = word_starts.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    let stride = config.max_tokens - config.overlap_tokens;

    let mut chunks = Vec::with_capacity(n / stride + 1);
    let mut first_word = 0usize;
    loop {
        let last_word = (first_word + config.max_tokens).min(n);
        let start_offset = if first_word == 0 { 0 } else { word_starts[first_word] };
        let end_offset = if last_word == n { text.len() } else { word_starts[last_word] };
        let position = chunks.len();
        chunks.push(Chunk {
            chunk_id: chunk_id(&document.id, position),
            document_id: document.id.clone(),
            text: text[start_offset..end_offset].to_string(),
            token_count: last_word - first_word,
            position,
            start_offset,
            end_offset,
        });
        if last_word == n {
            break;
        }
        first_word += stride;
    }
    Ok(chunks)
}

/// Rebuild a document's text from its chunks, dropping each overlap prefix.
pub fn reassemble(chunks: &[Chunk]) -> Result<String> {
    let mut ordered: Vec<&Chunk> = chunks.iter().collect();
    ordered.sort_by_key(|c| c.position);
    let mut out = String::new();
    let mut covered = 0usize;
    for c in ordered {
        if c.start_offset > covered {
            return Err(Error::Operation(format!("gap before chunk {}", c.chunk_id)));
        }
        let skip = covered - c.start_offset;
        let tail = c
            .text
            .get(skip..)
            .ok_or_else(|| Error::Operation(format!("overlap of chunk {} is not on a char boundary", c.chunk_id)))?;
        out.push_str(tail);
        covered = c.end_offset.max(covered);
    }
    Ok(out)
}

fn word_starts(text: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut in_word = false;
    for (idx, ch) in text.char_indices() {
        if ch.is_whitespace() {
            in_word = false;
        } else if !in_word {
            in_word = true;
            starts.push(idx);
        }
    }
    starts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DocumentMetadata, SourceType};

    fn doc(text: &str) -> Document {
        Document::new("test/doc.txt", SourceType::CloudDrive, text.to_string(), DocumentMetadata::default())
    }

    #[test]
    fn short_document_is_a_single_chunk() {
        let d = doc("  demam dan batuk\n");
        let chunks = chunk(&d, &ChunkingConfig { max_tokens: 10, overlap_tokens: 2 }).expect("chunk");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, d.raw_text);
        assert_eq!(chunks[0].token_count, 3);
        assert_eq!(chunks[0].chunk_id, format!("{}:000000", d.id));
    }

    #[test]
    fn windows_overlap_by_fixed_stride() {
        let d = doc("a b c d e f g h i j");
        let chunks = chunk(&d, &ChunkingConfig { max_tokens: 4, overlap_tokens: 1 }).expect("chunk");
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.trim()).collect();
        assert_eq!(texts, vec!["a b c d", "d e f g", "g h i j"]);
        assert!(chunks.iter().all(|c| c.token_count <= 4));
        assert_eq!(reassemble(&chunks).expect("reassemble"), d.raw_text);
    }

    #[test]
    fn reassembly_is_exact_with_irregular_whitespace() {
        let d = doc("Pasien\tmengeluh  demam sejak tiga hari.\n\nBatuk berdahak, pilek; nyeri tenggorokan. ");
        let chunks = chunk(&d, &ChunkingConfig { max_tokens: 3, overlap_tokens: 1 }).expect("chunk");
        assert!(chunks.len() > 2);
        assert_eq!(reassemble(&chunks).expect("reassemble"), d.raw_text);
        for pair in chunks.windows(2) {
            assert!(pair[0].chunk_id < pair[1].chunk_id);
        }
    }

    #[test]
    fn whitespace_document_has_no_chunks() {
        let chunks = chunk(&doc(" \n\t "), &ChunkingConfig::default()).expect("chunk");
        assert!(chunks.is_empty());
    }
}
