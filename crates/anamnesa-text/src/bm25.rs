//! In-memory inverted index with BM25 ranking.
//!
//! Postings map a normalized term to `(chunk slot, term frequency)` pairs.
//! idf uses the `ln(1 + (N - n + 0.5) / (n + 0.5))` variant, so every score
//! is non-negative; only positive scores are returned.
use std::collections::HashMap;

use anamnesa_core::config::{Bm25Config, TokenizerConfig};
use anamnesa_core::error::IndexLoadError;
use anamnesa_core::types::{ChunkId, SearchHit, SourceKind};
use serde::{Deserialize, Serialize};

use crate::analyzer::Analyzer;

#[derive(Debug, Clone)]
pub struct KeywordIndex {
    analyzer: Analyzer,
    params: Bm25Config,
    ids: Vec<ChunkId>,
    lengths: Vec<u32>,
    slots: HashMap<ChunkId, u32>,
    postings: HashMap<String, Vec<(u32, u32)>>,
    total_tokens: u64,
}

/// Serializable form of a [`KeywordIndex`]. Terms are sorted so equal
/// indexes encode to equal bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordArtifact {
    pub tokenizer: TokenizerConfig,
    pub params: Bm25Config,
    pub ids: Vec<ChunkId>,
    pub lengths: Vec<u32>,
    pub postings: Vec<(String, Vec<(u32, u32)>)>,
}

impl KeywordIndex {
    pub fn new(analyzer: Analyzer, params: Bm25Config) -> Self {
        Self {
            analyzer,
            params,
            ids: Vec::new(),
            lengths: Vec::new(),
            slots: HashMap::new(),
            postings: HashMap::new(),
            total_tokens: 0,
        }
    }

    /// Build from `(chunk_id, text)` pairs.
    pub fn build<'a, I>(analyzer: Analyzer, params: Bm25Config, chunks: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut index = Self::new(analyzer, params);
        for (id, text) in chunks {
            index.upsert(id, text);
        }
        tracing::debug!(chunks = index.len(), terms = index.postings.len(), "built keyword index");
        index
    }

    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    pub fn ids(&self) -> &[ChunkId] {
        &self.ids
    }

    /// Index `text` under `chunk_id`, replacing any earlier postings for it.
    pub fn upsert(&mut self, chunk_id: &str, text: &str) {
        let terms = self.analyzer.tokenize(text);
        let length = u32::try_from(terms.len()).unwrap_or(u32::MAX);

        let slot = if let Some(&slot) = self.slots.get(chunk_id) {
            self.remove_postings(slot);
            self.total_tokens -= u64::from(self.lengths[slot as usize]);
            self.lengths[slot as usize] = length;
            slot
        } else {
            let slot = u32::try_from(self.ids.len()).unwrap_or(u32::MAX);
            self.ids.push(chunk_id.to_string());
            self.lengths.push(length);
            self.slots.insert(chunk_id.to_string(), slot);
            slot
        };
        self.total_tokens += u64::from(length);

        let mut freqs: HashMap<String, u32> = HashMap::new();
        for term in terms {
            *freqs.entry(term).or_insert(0) += 1;
        }
        for (term, tf) in freqs {
            self.postings.entry(term).or_default().push((slot, tf));
        }
    }

    fn remove_postings(&mut self, slot: u32) {
        for list in self.postings.values_mut() {
            list.retain(|(s, _)| *s != slot);
        }
        self.postings.retain(|_, v| !v.is_empty());
    }

    /// Tokenize `query` with the index analyzer and search.
    pub fn search_text(&self, query: &str, k: usize) -> Vec<SearchHit> {
        self.search(&self.analyzer.tokenize(query), k)
    }

    /// Top `k` chunks by BM25 for already-normalized `query_tokens`.
    /// Sorted by score descending, ties by lower chunk id.
    pub fn search(&self, query_tokens: &[String], k: usize) -> Vec<SearchHit> {
        if k == 0 || self.ids.is_empty() || query_tokens.is_empty() {
            return Vec::new();
        }
        let n_docs = self.ids.len() as f64;
        let avg_len = (self.total_tokens as f64 / n_docs).max(1.0);
        let k1 = f64::from(self.params.k1);
        let b = f64::from(self.params.b);

        // Terms are visited in sorted order, so matched terms come out sorted.
        let mut scores: HashMap<u32, (f64, Vec<&str>)> = HashMap::new();
        let mut unique: Vec<&str> = query_tokens.iter().map(String::as_str).collect();
        unique.sort_unstable();
        unique.dedup();
        for term in unique {
            let Some(postings) = self.postings.get(term) else { continue };
            let n = postings.len() as f64;
            let idf = ((n_docs - n + 0.5) / (n + 0.5) + 1.0).ln();
            for &(slot, tf) in postings {
                let tf = f64::from(tf);
                let doc_len = f64::from(self.lengths[slot as usize]);
                let norm = tf + k1 * (1.0 - b + b * doc_len / avg_len);
                let entry = scores.entry(slot).or_insert((0.0, Vec::new()));
                entry.0 += idf * tf * (k1 + 1.0) / norm;
                entry.1.push(term);
            }
        }

        let mut hits: Vec<SearchHit> = scores
            .into_iter()
            .filter(|(_, (s, _))| *s > 0.0)
            .map(|(slot, (s, terms))| SearchHit {
                matched_terms: terms.into_iter().map(str::to_string).collect(),
                ..SearchHit::new(self.ids[slot as usize].clone(), s as f32, SourceKind::Keyword)
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(k);
        hits
    }

    pub fn to_artifact(&self) -> KeywordArtifact {
        let mut postings: Vec<(String, Vec<(u32, u32)>)> = self
            .postings
            .iter()
            .map(|(term, list)| {
                let mut list = list.clone();
                list.sort_unstable();
                (term.clone(), list)
            })
            .collect();
        postings.sort_by(|a, b| a.0.cmp(&b.0));
        KeywordArtifact {
            tokenizer: self.analyzer.settings().clone(),
            params: self.params,
            ids: self.ids.clone(),
            lengths: self.lengths.clone(),
            postings,
        }
    }

    /// Rebuild from an artifact, restoring its analyzer settings.
    pub fn from_artifact(artifact: KeywordArtifact) -> Result<Self, IndexLoadError> {
        let KeywordArtifact { tokenizer, params, ids, lengths, postings } = artifact;
        if ids.len() != lengths.len() {
            return Err(IndexLoadError::Inconsistent(format!(
                "keyword index has {} ids but {} lengths",
                ids.len(),
                lengths.len()
            )));
        }
        let mut slots = HashMap::with_capacity(ids.len());
        for (slot, id) in ids.iter().enumerate() {
            let slot = u32::try_from(slot).map_err(|e| IndexLoadError::Inconsistent(e.to_string()))?;
            if slots.insert(id.clone(), slot).is_some() {
                return Err(IndexLoadError::Inconsistent(format!("duplicate keyword chunk id {id}")));
            }
        }
        if let Some((term, _)) = postings.iter().find(|(_, list)| list.iter().any(|(s, _)| *s as usize >= ids.len())) {
            return Err(IndexLoadError::Inconsistent(format!("posting for '{term}' points past the chunk table")));
        }
        let total_tokens = lengths.iter().map(|l| u64::from(*l)).sum();
        Ok(Self {
            analyzer: Analyzer::new(tokenizer),
            params,
            ids,
            lengths,
            slots,
            postings: postings.into_iter().collect(),
            total_tokens,
        })
    }
}
